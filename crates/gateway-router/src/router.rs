use gateway_core::config::AgentsConfig;
use gateway_core::types::{AgentId, Peer, SessionKey};

/// Resolves a [`Peer`] to a `(SessionKey, AgentId)` pair (spec §4.6). Rules
/// are applied in order and the first match wins:
///
/// 1. an explicit agent configured for this `(channel, accountId, chatId)`
///    tuple;
/// 2. the channel's group-routing table, keyed by `chatId` or wildcard `*`;
/// 3. the default agent (`main`).
pub struct SessionRouter<'a> {
    agents: &'a AgentsConfig,
}

impl<'a> SessionRouter<'a> {
    pub fn new(agents: &'a AgentsConfig) -> Self {
        Self { agents }
    }

    pub fn route(&self, peer: &Peer) -> (SessionKey, AgentId) {
        let agent_id = self.resolve_agent(peer);
        let key = SessionKey::conversation(
            &agent_id,
            peer.channel,
            peer.kind,
            &peer.id,
            peer.topic_id.as_deref(),
        );
        (key, agent_id)
    }

    fn resolve_agent(&self, peer: &Peer) -> AgentId {
        let tuple_key = format!("{}:{}:{}", peer.channel, peer.account_id, peer.id);
        if let Some(agent_id) = self.agents.explicit_routes.get(&tuple_key) {
            return AgentId::from(agent_id.as_str());
        }

        if let Some(group_table) = self.agents.group_routes.get(&peer.channel.to_string()) {
            if let Some(agent_id) = group_table.get(&peer.id) {
                return AgentId::from(agent_id.as_str());
            }
            if let Some(agent_id) = group_table.get("*") {
                return AgentId::from(agent_id.as_str());
            }
        }

        AgentId::main()
    }
}
