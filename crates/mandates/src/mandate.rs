use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use polity_core::{
    ActorId, Aggregate, AggregateRoot, AuthorityGate, AuthorityRequest, CommandContext, DomainError,
    GatePipeline, MandateId, StreamId,
};
use polity_events::{Command, DecodeEvent, Event, SchemaError, decode_payload, encode_payload};

pub const STREAM_TYPE: &str = "mandate";

/// Authority scope for acting on a mandate on the holder's behalf.
pub const SCOPE: &str = "mandate";

const MAX_REVIEW_INTERVAL_DAYS: u32 = 3650;

pub fn mandate_stream(id: MandateId) -> StreamId {
    StreamId::for_entity(STREAM_TYPE, *id.as_uuid())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateStatus {
    Active,
    Retired,
}

/// Command: CharterMandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharterMandate {
    pub mandate_id: MandateId,
    pub title: String,
    pub holder: ActorId,
    pub review_interval_days: u32,
}

/// Command: CompleteReview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteReview {
    pub mandate_id: MandateId,
}

/// Command: RetireMandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetireMandate {
    pub mandate_id: MandateId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MandateCommand {
    Charter(CharterMandate),
    CompleteReview(CompleteReview),
    Retire(RetireMandate),
}

impl MandateCommand {
    pub fn mandate_id(&self) -> MandateId {
        match self {
            MandateCommand::Charter(c) => c.mandate_id,
            MandateCommand::CompleteReview(c) => c.mandate_id,
            MandateCommand::Retire(c) => c.mandate_id,
        }
    }
}

impl Command for MandateCommand {
    fn target_stream(&self) -> StreamId {
        mandate_stream(self.mandate_id())
    }

    fn command_type(&self) -> &'static str {
        match self {
            MandateCommand::Charter(_) => "mandate.charter",
            MandateCommand::CompleteReview(_) => "mandate.complete_review",
            MandateCommand::Retire(_) => "mandate.retire",
        }
    }
}

/// Event: MandateChartered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandateChartered {
    pub mandate_id: MandateId,
    pub title: String,
    pub holder: ActorId,
    pub review_interval_days: u32,
    pub next_checkpoint_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReviewCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewCompleted {
    pub mandate_id: MandateId,
    pub next_checkpoint_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MandateRetired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandateRetired {
    pub mandate_id: MandateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MandateEvent {
    Chartered(MandateChartered),
    ReviewCompleted(ReviewCompleted),
    Retired(MandateRetired),
}

impl MandateEvent {
    pub const CHARTERED: &'static str = "mandate.chartered";
    pub const REVIEW_COMPLETED: &'static str = "mandate.review_completed";
    pub const RETIRED: &'static str = "mandate.retired";
}

impl Event for MandateEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MandateEvent::Chartered(_) => Self::CHARTERED,
            MandateEvent::ReviewCompleted(_) => Self::REVIEW_COMPLETED,
            MandateEvent::Retired(_) => Self::RETIRED,
        }
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MandateEvent::Chartered(e) => e.occurred_at,
            MandateEvent::ReviewCompleted(e) => e.occurred_at,
            MandateEvent::Retired(e) => e.occurred_at,
        }
    }
}

impl DecodeEvent for MandateEvent {
    fn schema() -> &'static [(&'static str, u32)] {
        &[
            (MandateEvent::CHARTERED, 1),
            (MandateEvent::REVIEW_COMPLETED, 1),
            (MandateEvent::RETIRED, 1),
        ]
    }

    fn decode(event_type: &str, _schema_version: u32, payload: &JsonValue) -> Result<Self, SchemaError> {
        match event_type {
            Self::CHARTERED => Ok(MandateEvent::Chartered(decode_payload(event_type, payload)?)),
            Self::REVIEW_COMPLETED => Ok(MandateEvent::ReviewCompleted(decode_payload(event_type, payload)?)),
            Self::RETIRED => Ok(MandateEvent::Retired(decode_payload(event_type, payload)?)),
            other => Err(SchemaError::UnknownEventType(other.to_string())),
        }
    }

    fn encode(&self) -> Result<JsonValue, SchemaError> {
        let event_type = self.event_type();
        match self {
            MandateEvent::Chartered(e) => encode_payload(event_type, e),
            MandateEvent::ReviewCompleted(e) => encode_payload(event_type, e),
            MandateEvent::Retired(e) => encode_payload(event_type, e),
        }
    }
}

/// Aggregate root: Mandate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mandate {
    id: MandateId,
    created: bool,
    status: MandateStatus,
    title: String,
    holder: Option<ActorId>,
    review_interval_days: u32,
    next_checkpoint_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Mandate {
    pub fn empty(id: MandateId) -> Self {
        Self {
            id,
            created: false,
            status: MandateStatus::Active,
            title: String::new(),
            holder: None,
            review_interval_days: 0,
            next_checkpoint_at: None,
            version: 0,
        }
    }

    pub fn status(&self) -> MandateStatus {
        self.status
    }

    pub fn holder(&self) -> Option<ActorId> {
        self.holder
    }

    pub fn next_checkpoint_at(&self) -> Option<DateTime<Utc>> {
        self.next_checkpoint_at
    }

    fn ensure_active(&self) -> Result<ActorId, DomainError> {
        let holder = match (self.created, self.holder) {
            (true, Some(holder)) => holder,
            _ => return Err(DomainError::not_found(format!("mandate {}", self.id))),
        };
        if self.status == MandateStatus::Retired {
            return Err(DomainError::conflict(format!("mandate {} is retired", self.id)));
        }
        Ok(holder)
    }

    fn check_authority(&self, holder: ActorId, ctx: &CommandContext<'_>) -> Result<(), DomainError> {
        let request = AuthorityRequest {
            actor: ctx.actor,
            principal: holder,
            scope: SCOPE.to_string(),
            at: ctx.now,
        };
        let gate = AuthorityGate::new(ctx.authority, move |_: &()| request.clone());
        GatePipeline::<()>::new().then(&gate).evaluate(&())?;
        Ok(())
    }

    fn interval(&self) -> Duration {
        Duration::days(i64::from(self.review_interval_days))
    }
}

impl AggregateRoot for Mandate {
    type Id = MandateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Mandate {
    type Command = MandateCommand;
    type Event = MandateEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MandateEvent::Chartered(e) => {
                self.id = e.mandate_id;
                self.created = true;
                self.status = MandateStatus::Active;
                self.title = e.title.clone();
                self.holder = Some(e.holder);
                self.review_interval_days = e.review_interval_days;
                self.next_checkpoint_at = Some(e.next_checkpoint_at);
            }
            MandateEvent::ReviewCompleted(e) => {
                self.next_checkpoint_at = Some(e.next_checkpoint_at);
            }
            MandateEvent::Retired(_) => {
                self.status = MandateStatus::Retired;
            }
        }
        self.version += 1;
    }

    fn handle(
        &self,
        command: &Self::Command,
        ctx: &CommandContext<'_>,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        if command.mandate_id() != self.id {
            return Err(DomainError::validation("mandate_id mismatch"));
        }

        match command {
            MandateCommand::Charter(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("mandate already chartered"));
                }
                if cmd.title.trim().is_empty() {
                    return Err(DomainError::validation("title cannot be empty"));
                }
                if cmd.review_interval_days == 0 || cmd.review_interval_days > MAX_REVIEW_INTERVAL_DAYS {
                    return Err(DomainError::validation(format!(
                        "review interval must be between 1 and {MAX_REVIEW_INTERVAL_DAYS} days"
                    )));
                }
                self.check_authority(cmd.holder, ctx)?;

                Ok(vec![MandateEvent::Chartered(MandateChartered {
                    mandate_id: cmd.mandate_id,
                    title: cmd.title.trim().to_string(),
                    holder: cmd.holder,
                    review_interval_days: cmd.review_interval_days,
                    next_checkpoint_at: ctx.now + Duration::days(i64::from(cmd.review_interval_days)),
                    occurred_at: ctx.now,
                })])
            }
            MandateCommand::CompleteReview(cmd) => {
                let holder = self.ensure_active()?;
                self.check_authority(holder, ctx)?;
                Ok(vec![MandateEvent::ReviewCompleted(ReviewCompleted {
                    mandate_id: cmd.mandate_id,
                    next_checkpoint_at: ctx.now + self.interval(),
                    occurred_at: ctx.now,
                })])
            }
            MandateCommand::Retire(cmd) => {
                let holder = self.ensure_active()?;
                self.check_authority(holder, ctx)?;
                Ok(vec![MandateEvent::Retired(MandateRetired {
                    mandate_id: cmd.mandate_id,
                    occurred_at: ctx.now,
                })])
            }
        }
    }
}
