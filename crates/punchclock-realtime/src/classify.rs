//! Change notification → domain event decoding.

use punchclock_types::events::{ChangeNotification, ChangeOp, DomainEvent, EventKind};
use punchclock_types::models::SalaryStatus;

/// Pick the event kind for a change.
///
/// Deletes and inserts map directly. Updates are inspected: a paid record
/// (status or paid date) is `PaymentMarkedPaid` even when it also carries a
/// confirmation, a confirmed one is `PaymentConfirmed`, anything else is a
/// plain `SalaryUpdated`.
pub fn classify(change: &ChangeNotification) -> EventKind {
    match change.op {
        ChangeOp::Delete => EventKind::SalaryDeleted,
        ChangeOp::Insert => EventKind::SalaryCreated,
        ChangeOp::Update => match SalaryStatus::of_row(&change.record) {
            SalaryStatus::Paid => EventKind::PaymentMarkedPaid,
            SalaryStatus::Confirmed => EventKind::PaymentConfirmed,
            SalaryStatus::Pending => EventKind::SalaryUpdated,
        },
    }
}

/// Events to publish for one change: the classified event, then the same
/// payload under `SalaryUpdated` unless that was already its kind.
pub fn decode(change: &ChangeNotification) -> Vec<DomainEvent> {
    let kind = classify(change);
    let mut primary = DomainEvent::for_record(kind, change.table.clone(), change.subject().clone());
    if let Some(at) = change.commit_timestamp {
        primary.timestamp = at;
    }

    if kind == EventKind::SalaryUpdated {
        vec![primary]
    } else {
        let mirror = primary.with_kind(EventKind::SalaryUpdated);
        vec![primary, mirror]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn update(record: Value) -> ChangeNotification {
        ChangeNotification::new(ChangeOp::Update, "salary_records", record)
    }

    #[test]
    fn insert_and_delete_map_directly() {
        let insert = ChangeNotification::new(ChangeOp::Insert, "salary_records", json!({"id": "r1", "paid_date": "2026-01-01"}));
        assert_eq!(classify(&insert), EventKind::SalaryCreated);

        let delete = ChangeNotification::new(ChangeOp::Delete, "salary_records", json!({"id": "r1", "status": "paid"}));
        assert_eq!(classify(&delete), EventKind::SalaryDeleted);
    }

    #[test]
    fn paid_supersedes_confirmed() {
        let both = update(json!({
            "id": "r1",
            "paid_date": "2026-03-01T09:00:00Z",
            "confirmed_at": "2026-02-27T09:00:00Z",
        }));
        assert_eq!(classify(&both), EventKind::PaymentMarkedPaid);

        let status_only = update(json!({"id": "r1", "status": "paid", "confirmed_at": "2026-02-27T09:00:00Z"}));
        assert_eq!(classify(&status_only), EventKind::PaymentMarkedPaid);
    }

    #[test]
    fn confirmation_without_payment() {
        let change = update(json!({"id": "r1", "status": "pending", "paid_date": null, "confirmed_at": "2026-02-27T09:00:00Z"}));
        assert_eq!(classify(&change), EventKind::PaymentConfirmed);
    }

    #[test]
    fn plain_update() {
        let change = update(json!({"id": "r1", "status": "pending", "amount": 2100}));
        assert_eq!(classify(&change), EventKind::SalaryUpdated);
        let events = decode(&change);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::SalaryUpdated);
    }

    #[test]
    fn specific_events_are_mirrored_as_salary_updated() {
        let change = update(json!({"id": "r1", "user_id": 7, "paid_date": "2026-03-01"}));
        let events = decode(&change);

        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::PaymentMarkedPaid, EventKind::SalaryUpdated]);
        assert_eq!(events[0].data, events[1].data);
        assert_eq!(events[0].user_id.as_deref(), Some("7"));
        assert_eq!(Some(events[0].timestamp), change.commit_timestamp);
    }

    #[test]
    fn delete_event_carries_old_record() {
        let mut change = ChangeNotification::new(ChangeOp::Delete, "salary_records", Value::Null);
        change.old_record = json!({"id": "gone"});
        let events = decode(&change);
        assert_eq!(events[0].record_id().as_deref(), Some("gone"));
    }
}
