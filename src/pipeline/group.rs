//! Fan-out group: run several stages concurrently against the same
//! snapshot and collect their deltas.
//!
//! Members share one immutable snapshot, so they cannot observe each
//! other's partial work. A member that fails or exceeds the group
//! timeout contributes an error delta instead of poisoning its peers;
//! the executor merges whatever the group produced. Because the merge is
//! order-independent, join order does not matter.

use crate::stages::Stage;
use crate::state::{ResearchState, StateDelta};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

pub struct FanOutGroup {
    name: &'static str,
    members: Vec<Arc<dyn Stage>>,
    member_timeout: Duration,
}

impl FanOutGroup {
    pub fn new(
        name: &'static str,
        members: Vec<Arc<dyn Stage>>,
        member_timeout: Duration,
    ) -> Self {
        Self {
            name,
            members,
            member_timeout,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run all members concurrently and return their deltas. Never fails:
    /// member errors, timeouts, and panics all degrade to error deltas.
    pub async fn run(&self, snapshot: Arc<ResearchState>) -> Vec<StateDelta> {
        let mut set = JoinSet::new();
        for member in &self.members {
            let member = Arc::clone(member);
            let snapshot = Arc::clone(&snapshot);
            let timeout = self.member_timeout;
            set.spawn(async move {
                let name = member.name();
                let result = tokio::time::timeout(timeout, member.execute(&snapshot)).await;
                (name, result)
            });
        }

        let mut deltas = Vec::with_capacity(self.members.len());
        while let Some(joined) = set.join_next().await {
            let delta = match joined {
                Ok((_, Ok(Ok(output)))) => output.delta,
                Ok((name, Ok(Err(err)))) => {
                    tracing::warn!("group '{}': member '{name}' failed: {err}", self.name);
                    StateDelta {
                        errors: vec![format!("{name}: {err}")],
                        ..Default::default()
                    }
                }
                Ok((name, Err(_))) => {
                    tracing::warn!(
                        "group '{}': member '{name}' exceeded {:?} timeout",
                        self.name,
                        self.member_timeout
                    );
                    StateDelta {
                        errors: vec![format!("{name}: group timeout exceeded")],
                        ..Default::default()
                    }
                }
                Err(join_err) => {
                    tracing::error!("group '{}': member task panicked: {join_err}", self.name);
                    StateDelta {
                        errors: vec![format!("{}: member task panicked", self.name)],
                        ..Default::default()
                    }
                }
            };
            deltas.push(delta);
        }
        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageOutput;
    use crate::types::{AppError, Claim, Insight, Polarity, Result};
    use async_trait::async_trait;

    struct ClaimStage;

    #[async_trait]
    impl Stage for ClaimStage {
        fn name(&self) -> &'static str {
            "claims"
        }
        async fn execute(&self, _: &ResearchState) -> Result<StageOutput> {
            Ok(StageOutput::new(StateDelta {
                claims: vec![Claim::new("c", Polarity::Asserts, vec!["a.com".into()])],
                ..Default::default()
            }))
        }
    }

    struct InsightStage;

    #[async_trait]
    impl Stage for InsightStage {
        fn name(&self) -> &'static str {
            "insights"
        }
        async fn execute(&self, _: &ResearchState) -> Result<StageOutput> {
            Ok(StageOutput::new(StateDelta {
                insights: vec![Insight {
                    text: "i".into(),
                    confidence: 0.7,
                    supporting_sources: vec![],
                    reasoning: String::new(),
                }],
                ..Default::default()
            }))
        }
    }

    struct FailingStage;

    #[async_trait]
    impl Stage for FailingStage {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn execute(&self, _: &ResearchState) -> Result<StageOutput> {
            Err(AppError::Internal("boom".into()))
        }
    }

    struct SlowStage;

    #[async_trait]
    impl Stage for SlowStage {
        fn name(&self) -> &'static str {
            "slow"
        }
        async fn execute(&self, _: &ResearchState) -> Result<StageOutput> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StageOutput::default())
        }
    }

    #[tokio::test]
    async fn test_all_member_deltas_collected() {
        let group = FanOutGroup::new(
            "analysis",
            vec![Arc::new(ClaimStage), Arc::new(InsightStage)],
            Duration::from_secs(5),
        );
        let deltas = group.run(Arc::new(ResearchState::new("q", 2))).await;
        assert_eq!(deltas.len(), 2);

        let mut state = ResearchState::new("q", 2);
        for delta in deltas {
            state.apply(delta);
        }
        assert_eq!(state.claims.len(), 1);
        assert_eq!(state.insights.len(), 1);
        assert!(state.errors.is_empty());
    }

    #[tokio::test]
    async fn test_failing_member_degrades_without_poisoning_peers() {
        let group = FanOutGroup::new(
            "analysis",
            vec![Arc::new(ClaimStage), Arc::new(FailingStage)],
            Duration::from_secs(5),
        );
        let deltas = group.run(Arc::new(ResearchState::new("q", 2))).await;

        let mut state = ResearchState::new("q", 2);
        for delta in deltas {
            state.apply(delta);
        }
        assert_eq!(state.claims.len(), 1);
        assert_eq!(state.errors.len(), 1);
        assert!(state.errors[0].contains("failing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_member_times_out() {
        let group = FanOutGroup::new(
            "analysis",
            vec![Arc::new(SlowStage), Arc::new(ClaimStage)],
            Duration::from_millis(50),
        );
        let deltas = group.run(Arc::new(ResearchState::new("q", 2))).await;

        let mut state = ResearchState::new("q", 2);
        for delta in deltas {
            state.apply(delta);
        }
        assert_eq!(state.claims.len(), 1);
        assert!(state.errors.iter().any(|e| e.contains("timeout")));
    }
}
