//! Where local live actions are persisted.

use async_trait::async_trait;
use chrono::Utc;
use murmur_core::{
    Address, CodecError, LedgerGateway, LiveAction, LiveActionRecord, MurmurError, Operation,
    RecordCodec, Schema, SchemaId, SubjectId,
};
use std::sync::Arc;

/// Destination for optimistic live actions.
///
/// `persist` resolves once the action is durably written or has failed for
/// good. Callers in the live path never await it directly; see
/// [`persist_in_background`](crate::persist_in_background).
#[async_trait]
pub trait ActionSink: Send + Sync + 'static {
    async fn persist(
        &self,
        subject_id: &SubjectId,
        actor: Address,
        action: LiveAction,
    ) -> Result<(), MurmurError>;
}

/// Build the publish operation for one live action, keyed by subject.
pub fn live_publish_operation(
    schema: &Schema,
    schema_id: &SchemaId,
    subject_id: &SubjectId,
    actor: Address,
    action: LiveAction,
) -> Result<Operation, CodecError> {
    let record = LiveActionRecord {
        subject_id: subject_id.clone(),
        action,
        actor,
        timestamp: u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0),
        publisher: Address::ZERO,
        ledger_ref: None,
    };
    let data = RecordCodec::encode(schema, &record.to_values())?;
    Ok(Operation::publish(schema_id, subject_id.as_str(), &data))
}

/// Sink that writes straight to the gateway, one submit per action.
///
/// No queueing and no retries. The client crate routes actions through the
/// write queue instead.
pub struct GatewaySink {
    gateway: Arc<dyn LedgerGateway>,
    schema: Schema,
    schema_id: SchemaId,
}

impl GatewaySink {
    pub fn new(gateway: Arc<dyn LedgerGateway>, schema: Schema) -> Self {
        let schema_id = SchemaId::derive(&schema);
        Self {
            gateway,
            schema,
            schema_id,
        }
    }
}

#[async_trait]
impl ActionSink for GatewaySink {
    async fn persist(
        &self,
        subject_id: &SubjectId,
        actor: Address,
        action: LiveAction,
    ) -> Result<(), MurmurError> {
        let operation =
            live_publish_operation(&self.schema, &self.schema_id, subject_id, actor, action)?;
        let cost = self.gateway.estimate_cost(&operation).await?;
        let tx_hash = self.gateway.submit(&operation, cost).await?;
        self.gateway.confirm(&tx_hash, 1).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_test_utils::fixtures::{addr, live_schema};
    use murmur_test_utils::InMemoryLedger;

    #[test]
    fn test_live_publish_operation_round_trips() {
        let schema = live_schema();
        let schema_id = SchemaId::derive(&schema);
        let subject = SubjectId::from("post-42");
        let op = live_publish_operation(&schema, &schema_id, &subject, addr(3), LiveAction::View)
            .unwrap();

        let args = op.publish_args().unwrap();
        assert_eq!(args.key, "post-42");
        let values = RecordCodec::decode_values(&schema, &args.data_bytes().unwrap()).unwrap();
        assert_eq!(values.len(), 4);
    }

    #[tokio::test]
    async fn test_gateway_sink_appends_record() {
        let ledger = InMemoryLedger::new(addr(9));
        let sink = GatewaySink::new(Arc::new(ledger.clone()), live_schema());
        sink.persist(&SubjectId::from("s"), addr(1), LiveAction::TypingStart)
            .await
            .unwrap();
        assert_eq!(
            ledger.record_count(&SchemaId::derive(&live_schema()), addr(9)),
            1
        );
    }
}
