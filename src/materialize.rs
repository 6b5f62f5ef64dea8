//! Ticket materialization: turning a submission payload into a ticket.
//!
//! The same parser validates requests at intake and rebuilds ticket
//! arguments in the worker, so a payload that was accepted always parses.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::model::{NewTicket, Priority, Submission, SubmissionId, Ticket, TicketStatus};
use crate::store::TicketStore;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Parse ticket creation arguments out of a payload mapping.
///
/// `title` and `form_id` are required. `description` defaults to empty,
/// `priority`/`status` to medium/open, `payload` to an empty mapping.
pub fn ticket_from_payload(
    payload: &Map<String, Value>,
    submission_id: Option<SubmissionId>,
) -> Result<NewTicket> {
    let title = match payload.get("title") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(Error::Validation("title is required".into()));
        }
        Some(_) => return Err(Error::Validation("title must be a string".into())),
    };

    let form_id = optional_id(payload, "form_id")?
        .ok_or_else(|| Error::Validation("form_id is required".into()))?;

    let description = match payload.get("description") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(_) => return Err(Error::Validation("description must be a string".into())),
    };

    let priority = match optional_str(payload, "priority")? {
        Some(s) => s.parse::<Priority>()?,
        None => Priority::default(),
    };
    let status = match optional_str(payload, "status")? {
        Some(s) => s.parse::<TicketStatus>()?,
        None => TicketStatus::default(),
    };

    let extra = match payload.get("payload") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(Error::Validation("payload must be an object".into())),
    };

    let due_date = match optional_str(payload, "due_date")? {
        Some(s) => Some(
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|_| Error::Validation(format!("due_date is not a date: {s:?}")))?,
        ),
        None => None,
    };

    Ok(NewTicket {
        title,
        description,
        form_id,
        requester_id: optional_id(payload, "requester_id")?,
        assignee_id: optional_id(payload, "assignee_id")?,
        workflow_id: optional_id(payload, "workflow_id")?,
        priority,
        status,
        payload: extra,
        due_date,
        submission_id,
    })
}

/// Canonical payload for a parsed ticket. Optional fields that were absent
/// stay absent.
pub fn payload_from_ticket(ticket: &NewTicket) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("title".into(), Value::from(ticket.title.clone()));
    map.insert("description".into(), Value::from(ticket.description.clone()));
    map.insert("form_id".into(), Value::from(ticket.form_id));
    for (key, id) in [
        ("requester_id", ticket.requester_id),
        ("assignee_id", ticket.assignee_id),
        ("workflow_id", ticket.workflow_id),
    ] {
        if let Some(id) = id {
            map.insert(key.into(), Value::from(id));
        }
    }
    map.insert("priority".into(), Value::from(ticket.priority.as_str()));
    map.insert("status".into(), Value::from(ticket.status.as_str()));
    map.insert("payload".into(), Value::Object(ticket.payload.clone()));
    if let Some(due) = ticket.due_date {
        map.insert("due_date".into(), Value::from(due.to_string()));
    }
    map
}

fn optional_str<'a>(payload: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(Error::Validation(format!("{key} must be a string"))),
    }
}

fn optional_id(payload: &Map<String, Value>, key: &str) -> Result<Option<i64>> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_i64() {
            Some(id) if id > 0 => Ok(Some(id)),
            _ => Err(Error::Validation(format!("{key} must be a positive integer"))),
        },
    }
}

/// Creates tickets from submissions through the ticket collaborator.
#[derive(Clone)]
pub struct Materializer {
    tickets: Arc<dyn TicketStore>,
}

impl Materializer {
    pub fn new(tickets: Arc<dyn TicketStore>) -> Self {
        Self { tickets }
    }

    /// Persist exactly one ticket for the submission.
    ///
    /// Validation fails before anything is written. A redelivered submission
    /// gets back the ticket it already produced.
    pub async fn materialize(&self, submission: &Submission) -> Result<Ticket> {
        let started = Instant::now();
        let result = match ticket_from_payload(&submission.request_payload, Some(submission.id)) {
            Ok(new) => self.tickets.create(new).await,
            Err(e) => Err(e),
        };
        metrics::materialize_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new(
                "result",
                if result.is_ok() { "ok" } else { "error" },
            )],
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn defaults_fill_missing_optionals() {
        let ticket =
            ticket_from_payload(&map(json!({"title": " Laptop ", "form_id": 1})), None).unwrap();
        assert_eq!(ticket.title, "Laptop");
        assert_eq!(ticket.description, "");
        assert_eq!(ticket.priority, Priority::Medium);
        assert_eq!(ticket.status, TicketStatus::Open);
        assert!(ticket.payload.is_empty());
        assert_eq!(ticket.assignee_id, None);
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let err = ticket_from_payload(&map(json!({"form_id": 1})), None).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("title")));

        let err = ticket_from_payload(&map(json!({"title": "x"})), None).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("form_id")));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err = ticket_from_payload(
            &map(json!({"title": "x", "form_id": 1, "payload": [1, 2]})),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn enums_are_case_insensitive_and_canonicalized() {
        let ticket = ticket_from_payload(
            &map(json!({
                "title": "Badge",
                "form_id": 3,
                "priority": "HIGH",
                "status": "In_Progress",
                "due_date": "2026-11-02",
            })),
            None,
        )
        .unwrap();
        let canonical = payload_from_ticket(&ticket);
        assert_eq!(canonical["priority"], "high");
        assert_eq!(canonical["status"], "in_progress");
        assert_eq!(canonical["due_date"], "2026-11-02");
        assert_eq!(ticket_from_payload(&canonical, None).unwrap(), ticket);
    }

    #[test]
    fn ids_must_be_positive_integers() {
        for bad in [json!("7"), json!(0), json!(-2), json!(1.5)] {
            let err = ticket_from_payload(
                &map(json!({"title": "x", "form_id": 1, "assignee_id": bad})),
                None,
            )
            .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
    }
}
