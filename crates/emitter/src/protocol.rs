//! The wire envelope shared by the in-process and WebSocket transports
//! (§4.6). One tagged-enum pair, gateway-initiated in both directions —
//! unlike the teacher's `sa_protocol::WsMessage`, which only has the node
//! respond to `tool_request`, here the gateway also pushes approval prompts
//! and the client pushes results unprompted once a human decides.

use std::collections::HashMap;

use ao_domain::task::TaskOutput;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway → client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayMessage {
    /// Dispatch one client-targeted task.
    #[serde(rename = "task_execute_single")]
    TaskExecuteSingle {
        session_id: String,
        task_id: String,
        tool: String,
        generation: u64,
        resolved_inputs: HashMap<String, Value>,
        /// Already-terminal outputs of this task's dependencies, keyed by
        /// task id — the server/client boundary enrichment of §4.3/§4.6.
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        server_completed_dependencies: HashMap<String, TaskOutput>,
    },

    /// Dispatch a batch of independent client-targeted tasks at once.
    #[serde(rename = "task_execute_batch")]
    TaskExecuteBatch {
        session_id: String,
        tasks: Vec<BatchedTask>,
    },

    /// Ask a human to approve or deny a `waiting` task.
    #[serde(rename = "approval_request")]
    ApprovalRequest {
        session_id: String,
        task_id: String,
        #[serde(default)]
        question: Option<String>,
    },

    /// Informational text surfaced to the user (lifecycle message, status
    /// line) that doesn't drive any state transition.
    #[serde(rename = "acknowledgment")]
    Acknowledgment { session_id: String, text: String },

    /// Heartbeat.
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchedTask {
    pub task_id: String,
    pub tool: String,
    pub generation: u64,
    pub resolved_inputs: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub server_completed_dependencies: HashMap<String, TaskOutput>,
}

/// Client → gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// The result of one previously-dispatched task.
    #[serde(rename = "task_result")]
    TaskResult {
        session_id: String,
        task_id: String,
        generation: u64,
        success: bool,
        #[serde(default)]
        data: HashMap<String, Value>,
        #[serde(default)]
        error: Option<String>,
    },

    /// A human's decision on a pending `approval_request`.
    #[serde(rename = "approval_response")]
    ApprovalResponse {
        session_id: String,
        task_id: String,
        approved: bool,
    },

    /// Informational status ping from the client (no state transition).
    #[serde(rename = "status")]
    Status {
        session_id: String,
        #[serde(default)]
        text: Option<String>,
    },

    /// Heartbeat response.
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_message_round_trips_through_json() {
        let msg = GatewayMessage::TaskExecuteSingle {
            session_id: "s1".into(),
            task_id: "t1".into(),
            tool: "file_create".into(),
            generation: 0,
            resolved_inputs: HashMap::new(),
            server_completed_dependencies: HashMap::new(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"task_execute_single\""));
        let back: GatewayMessage = serde_json::from_str(&json).unwrap();
        match back {
            GatewayMessage::TaskExecuteSingle { task_id, .. } => assert_eq!(task_id, "t1"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn empty_server_completed_dependencies_are_omitted() {
        let msg = GatewayMessage::TaskExecuteSingle {
            session_id: "s1".into(),
            task_id: "t1".into(),
            tool: "noop".into(),
            generation: 0,
            resolved_inputs: HashMap::new(),
            server_completed_dependencies: HashMap::new(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("server_completed_dependencies"));
    }

    #[test]
    fn client_message_round_trips_through_json() {
        let msg = ClientMessage::TaskResult {
            session_id: "s1".into(),
            task_id: "t1".into(),
            generation: 2,
            success: true,
            data: HashMap::new(),
            error: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::TaskResult { generation, .. } => assert_eq!(generation, 2),
            _ => panic!("wrong variant"),
        }
    }
}
