//! Agent/API query collaborator contract and live-data amendment.
//!
//! In live-data mode the orchestrator sends each turn's query to the
//! application under evaluation before any metric runs. The collaborator
//! returns the response, optional tool calls, and a conversation
//! identifier that is threaded into subsequent turns of the same group.

use crate::errors::ExternalCallError;
use crate::models::data::{ConversationGroup, ToolCall};

/// One query to the application under evaluation.
#[derive(Debug, Clone, Copy)]
pub struct AgentQuery<'a> {
    pub query: &'a str,
    /// Conversation identifier from the prior turn; absent for the first
    /// turn of a group.
    pub conversation_id: Option<&'a str>,
    pub attachments: &'a [String],
}

/// The application's reply to one query.
#[derive(Debug, Clone, Default)]
pub struct AgentReply {
    pub response: String,
    /// Context documents surfaced by the application, if any.
    pub contexts: Vec<String>,
    pub tool_calls: Vec<Vec<ToolCall>>,
    /// Identifier to thread into the group's subsequent turns.
    pub conversation_id: Option<String>,
}

/// Client for the application under evaluation. Implementations own all
/// transport, credential, and retry concerns.
pub trait AgentClient: Send + Sync {
    fn query(&self, request: &AgentQuery<'_>) -> Result<AgentReply, ExternalCallError>;
}

/// Amendment failure: the turn it happened on and the captured message.
#[derive(Debug, Clone)]
pub struct AmendError {
    pub turn_index: usize,
    pub turn_id: String,
    pub message: String,
}

/// Populates turn responses and tool calls from the agent collaborator,
/// threading the conversation identifier across a group's turns.
pub struct DataAmender<'a> {
    client: &'a dyn AgentClient,
}

impl<'a> DataAmender<'a> {
    pub fn new(client: &'a dyn AgentClient) -> Self {
        Self { client }
    }

    /// Amend every turn of a group in declared order.
    ///
    /// Stops at the first failing query: later turns keep their existing
    /// data, and the failure is returned for the orchestrator to convert
    /// into ERROR results for that turn.
    pub fn amend_group(&self, group: &mut ConversationGroup) -> Result<(), AmendError> {
        let mut conversation_id: Option<String> = None;

        for (turn_index, turn) in group.turns.iter_mut().enumerate() {
            if let Some(existing) = &turn.conversation_id {
                conversation_id = Some(existing.clone());
            }
            log::debug!(
                "amending turn {} of group {} via agent",
                turn.turn_id,
                group.group_id
            );

            let request = AgentQuery {
                query: &turn.query,
                conversation_id: conversation_id.as_deref(),
                attachments: &turn.attachments,
            };
            match self.client.query(&request) {
                Ok(reply) => {
                    turn.response = Some(reply.response);
                    if !reply.contexts.is_empty() {
                        turn.contexts = reply.contexts;
                    }
                    if !reply.tool_calls.is_empty() {
                        turn.tool_calls = reply.tool_calls;
                    }
                    turn.conversation_id = reply.conversation_id.clone();
                    conversation_id = reply.conversation_id;
                }
                Err(err) => {
                    log::error!(
                        "agent query failed for turn {} of group {}: {err}",
                        turn.turn_id,
                        group.group_id
                    );
                    return Err(AmendError {
                        turn_index,
                        turn_id: turn.turn_id.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
