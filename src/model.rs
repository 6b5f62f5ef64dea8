//! Core data model.
//!
//! A submission is a durable request to create a ticket. It moves through
//! pending → processing → completed/failed while a worker materializes it.

pub mod submission;
pub mod ticket;

pub use submission::{ClientReference, QueueMetrics, Submission, SubmissionId, SubmissionStatus};
pub use ticket::{NewTicket, Priority, Ticket, TicketId, TicketStatus};
