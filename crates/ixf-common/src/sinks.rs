//! Mail and ticket sinks.
//!
//! The importer hands rendered notifications to a [`MailSink`] and
//! escalations to a [`TicketSink`]. Delivery itself is out of scope; the
//! implementations here either record what they were given or log it.

use crate::error::{IxfError, IxfResult};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Outbound mail.
#[async_trait]
pub trait MailSink: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> IxfResult<()>;
}

/// Reference to a ticket in the external ticketing system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketRef {
    pub id: u64,
    pub reference: String,
}

impl fmt::Display for TicketRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.reference, self.id)
    }
}

/// Outbound tickets.
#[async_trait]
pub trait TicketSink: Send + Sync {
    async fn create_ticket(&self, subject: &str, body: &str) -> IxfResult<TicketRef>;

    async fn append_to_ticket(&self, ticket: &TicketRef, text: &str) -> IxfResult<()>;
}

/// One mail handed to a [`MemoryMailSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Mail sink that keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemoryMailSink {
    sent: Mutex<Vec<SentMail>>,
    fail: Mutex<bool>,
}

impl MemoryMailSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `send` fail until reset.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl MailSink for MemoryMailSink {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> IxfResult<()> {
        if *self.fail.lock() {
            return Err(IxfError::sink("mail", "delivery disabled"));
        }
        self.sent.lock().push(SentMail {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Mail sink that only logs.
#[derive(Debug, Default)]
pub struct LogMailSink;

#[async_trait]
impl MailSink for LogMailSink {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> IxfResult<()> {
        info!(
            recipients = %recipients.join(", "),
            subject,
            body_len = body.len(),
            "Mail handed to sink"
        );
        Ok(())
    }
}

/// A ticket held by a [`MemoryTicketSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub ticket_ref: TicketRef,
    pub subject: String,
    pub body: String,
    pub updates: Vec<String>,
}

/// Ticket sink that keeps every ticket in memory and logs each call.
///
/// Ids start at the given offset so refs stay unique across process runs
/// when the offset is taken from the current time.
#[derive(Debug)]
pub struct MemoryTicketSink {
    next_id: AtomicU64,
    tickets: Mutex<Vec<Ticket>>,
    fail: Mutex<bool>,
}

impl Default for MemoryTicketSink {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl MemoryTicketSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(first_id: u64) -> Self {
        MemoryTicketSink {
            next_id: AtomicU64::new(first_id),
            tickets: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        }
    }

    /// Ticket sink whose ids are derived from the current time.
    pub fn time_seeded() -> Self {
        let seed = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(1);
        Self::starting_at(seed)
    }

    /// Makes every following call fail until reset.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn tickets(&self) -> Vec<Ticket> {
        self.tickets.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.tickets.lock().len()
    }
}

#[async_trait]
impl TicketSink for MemoryTicketSink {
    async fn create_ticket(&self, subject: &str, body: &str) -> IxfResult<TicketRef> {
        if *self.fail.lock() {
            return Err(IxfError::sink("ticket", "ticketing unavailable"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let ticket_ref = TicketRef {
            id,
            reference: format!("IXF-{}", id),
        };
        info!(ticket = %ticket_ref, subject, "Ticket created");
        self.tickets.lock().push(Ticket {
            ticket_ref: ticket_ref.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
            updates: Vec::new(),
        });
        Ok(ticket_ref)
    }

    async fn append_to_ticket(&self, ticket: &TicketRef, text: &str) -> IxfResult<()> {
        if *self.fail.lock() {
            return Err(IxfError::sink("ticket", "ticketing unavailable"));
        }
        info!(ticket = %ticket, "Ticket updated");
        let mut tickets = self.tickets.lock();
        match tickets.iter_mut().find(|t| &t.ticket_ref == ticket) {
            Some(existing) => existing.updates.push(text.to_string()),
            // Tickets opened by an earlier process are not held in memory.
            None => tickets.push(Ticket {
                ticket_ref: ticket.clone(),
                subject: String::new(),
                body: String::new(),
                updates: vec![text.to_string()],
            }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_memory_mail_sink_records() {
        let sink = MemoryMailSink::new();
        sink.send(&["noc@example.net".to_string()], "subject", "body")
            .await
            .unwrap();
        assert_eq!(sink.count(), 1);
        assert_eq!(sink.sent()[0].recipients, vec!["noc@example.net"]);

        sink.set_failing(true);
        let err = sink.send(&[], "subject", "body").await.unwrap_err();
        assert_eq!(err.kind(), "sink");
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_memory_ticket_sink_append() {
        let sink = MemoryTicketSink::starting_at(10);
        let first = sink.create_ticket("one", "body").await.unwrap();
        let second = sink.create_ticket("two", "body").await.unwrap();
        assert_eq!(first.id, 10);
        assert_eq!(second.reference, "IXF-11");

        sink.append_to_ticket(&first, "resolved").await.unwrap();
        let tickets = sink.tickets();
        assert_eq!(tickets.len(), 2);
        assert_eq!(tickets[0].updates, vec!["resolved"]);
        assert!(tickets[1].updates.is_empty());

        sink.set_failing(true);
        assert!(sink.create_ticket("three", "body").await.is_err());
        assert!(sink.append_to_ticket(&first, "again").await.is_err());
        assert_eq!(sink.count(), 2);
    }

    #[test]
    fn test_log_mail_sink() {
        tokio_test::block_on(async {
            assert!(LogMailSink.send(&[], "subject", "body").await.is_ok());
        });
    }
}
