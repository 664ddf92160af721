//! Invocations for the node binary and its control client.

use crate::config::NodeConfig;
use qrand_proto::{ContextId, IdentityId, Invocation, SeedPayload};
use serde_json::json;

/// A contract method invoked through `client call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    /// `set_seed {"quantum_seed": [..]}`
    SetSeed(SeedPayload),
    /// `process_value {"node": "<name>"}`
    ProcessValue { node: String },
    /// `get_last_value`, no arguments
    GetLastValue,
}

impl ContractCall {
    pub fn method(&self) -> &'static str {
        match self {
            ContractCall::SetSeed(_) => "set_seed",
            ContractCall::ProcessValue { .. } => "process_value",
            ContractCall::GetLastValue => "get_last_value",
        }
    }

    /// JSON passed through `--args`, if the method takes any.
    pub fn args(&self) -> Option<serde_json::Value> {
        match self {
            ContractCall::SetSeed(seed) => Some(json!({ "quantum_seed": seed })),
            ContractCall::ProcessValue { node } => Some(json!({ "node": node })),
            ContractCall::GetLastValue => None,
        }
    }
}

/// Builds every invocation a session issues for one node.
#[derive(Debug, Clone)]
pub struct CommandSet {
    node_name: String,
    node_binary: String,
    client_binary: String,
    server_port: u16,
    swarm_port: u16,
}

impl CommandSet {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            node_name: config.name.clone(),
            node_binary: config.node_binary.clone(),
            client_binary: config.client_binary.clone(),
            server_port: config.server_port,
            swarm_port: config.swarm_port,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    fn node(&self) -> Invocation {
        Invocation::new(&self.node_binary).args(["--node-name", self.node_name.as_str()])
    }

    fn client(&self) -> Invocation {
        Invocation::new(&self.client_binary).args(["--node-name", self.node_name.as_str()])
    }

    /// `node --node-name <name> init --server-port <p1> --swarm-port <p2>`
    pub fn node_init(&self) -> Invocation {
        self.node()
            .arg("init")
            .arg("--server-port")
            .arg(self.server_port.to_string())
            .arg("--swarm-port")
            .arg(self.swarm_port.to_string())
    }

    /// `node --node-name <name> run`
    pub fn node_run(&self) -> Invocation {
        self.node().arg("run")
    }

    /// Process-listing regex identifying any instance of this node.
    pub fn node_pattern(&self) -> String {
        self.node().match_pattern()
    }

    /// `client --node-name <name> context ls`
    pub fn context_ls(&self) -> Invocation {
        self.client().args(["context", "ls"])
    }

    /// `client --node-name <name> identity ls <context>`
    pub fn identity_ls(&self, context: &ContextId) -> Invocation {
        self.client().args(["identity", "ls", context.as_str()])
    }

    /// `client --node-name <name> call --as <identity> <context> <method> [--args <json>]`
    pub fn call(&self, identity: &IdentityId, call: &ContractCall) -> Invocation {
        let inv = self.client().args([
            "call",
            "--as",
            identity.as_str(),
            identity.context().as_str(),
            call.method(),
        ]);
        match call.args() {
            Some(args) => inv.arg("--args").arg(args.to_string()),
            None => inv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrand_proto::ExtractedToken;

    fn commands() -> CommandSet {
        CommandSet::new(&NodeConfig::default())
    }

    fn identity() -> IdentityId {
        let context = ContextId::from(ExtractedToken::new("CTX"));
        IdentityId::new(ExtractedToken::new("ME"), context)
    }

    #[test]
    fn test_node_invocations() {
        let cmds = commands();
        assert_eq!(
            cmds.node_init().to_string(),
            "merod --node-name node1 init --server-port 2427 --swarm-port 2527"
        );
        assert_eq!(cmds.node_run().to_string(), "merod --node-name node1 run");
        assert_eq!(cmds.node_pattern(), "merod --node-name node1( |$)");
    }

    #[test]
    fn test_node_pattern_escapes_name() {
        let config = NodeConfig {
            name: "node.1".to_string(),
            ..NodeConfig::default()
        };
        let pattern = regex::Regex::new(&CommandSet::new(&config).node_pattern()).unwrap();
        assert!(pattern.is_match("merod --node-name node.1 run"));
        assert!(!pattern.is_match("merod --node-name nodeX1 run"));
        assert!(!pattern.is_match("merod --node-name node.10 run"));
    }

    #[test]
    fn test_discovery_invocations() {
        let cmds = commands();
        assert_eq!(cmds.context_ls().to_string(), "meroctl --node-name node1 context ls");
        let ctx = ContextId::from(ExtractedToken::new("CTX"));
        assert_eq!(
            cmds.identity_ls(&ctx).args,
            vec!["--node-name", "node1", "identity", "ls", "CTX"]
        );
    }

    #[test]
    fn test_set_seed_call() {
        let call = ContractCall::SetSeed(SeedPayload::new(vec![10, 20, 30, 40]));
        let inv = commands().call(&identity(), &call);
        assert_eq!(
            inv.args,
            vec![
                "--node-name",
                "node1",
                "call",
                "--as",
                "ME",
                "CTX",
                "set_seed",
                "--args",
                r#"{"quantum_seed":[10,20,30,40]}"#,
            ]
        );
    }

    #[test]
    fn test_process_value_call() {
        let call = ContractCall::ProcessValue {
            node: "node1".to_string(),
        };
        let inv = commands().call(&identity(), &call);
        assert_eq!(inv.args.last().map(String::as_str), Some(r#"{"node":"node1"}"#));
    }

    #[test]
    fn test_get_last_value_has_no_args() {
        let inv = commands().call(&identity(), &ContractCall::GetLastValue);
        assert_eq!(inv.args.last().map(String::as_str), Some("get_last_value"));
        assert!(!inv.args.iter().any(|a| a == "--args"));
    }
}
