// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed reader and writer handles over connection sinks.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use modkit_protocol::envelope::{self, Envelope, Message};

use crate::configuration::CONNECTIONCONFIGURATION_BLOCKING;
use crate::connection::Connection;
use crate::error::{ConnectionError, SinkError};
use crate::sink::{ReaderSink, WriterSink};

fn blocking_policy<C: Connection + ?Sized>(connection: &C) -> bool {
    connection
        .configuration()
        .get_attribute_or(CONNECTIONCONFIGURATION_BLOCKING, true)
}

/// Reads messages of type `T` from a [`ReaderSink`].
///
/// A blocking reader waits for the next envelope (bounded by the optional
/// timeout); a non-blocking reader fails with [`SinkError::Empty`] instead.
pub struct Reader<T> {
    sink: Arc<ReaderSink>,
    blocking: bool,
    timeout: Option<Duration>,
    last: Option<Envelope>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Message> Reader<T> {
    pub fn new(sink: Arc<ReaderSink>, blocking: bool) -> Self {
        Self {
            sink,
            blocking,
            timeout: None,
            last: None,
            _marker: PhantomData,
        }
    }

    /// Reader over a connection's inbound sink, using its blocking policy.
    pub fn from_connection<C: Connection + ?Sized>(connection: &C) -> Result<Self, ConnectionError> {
        let sink = connection.reader_sink().ok_or_else(|| {
            ConnectionError::InvalidArgument(format!(
                "connection '{}' has no reader sink",
                connection.configuration().name()
            ))
        })?;
        Ok(Self::new(sink, blocking_policy(connection)))
    }

    /// Bound the wait of blocking reads.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Consume the next envelope into `target`.
    ///
    /// The envelope is consumed even when conversion fails.
    pub fn read_into(&mut self, target: &mut T) -> Result<(), SinkError> {
        if self.sink.has_message_handler() {
            return Err(SinkError::HandlerActive);
        }
        let envelope = if self.blocking {
            self.sink.get(self.timeout)?
        } else {
            self.sink.try_get()?
        };
        let result = envelope::parse(&envelope, target);
        self.last = Some(envelope);
        Ok(result?)
    }

    /// Convert the most recently consumed envelope again.
    pub fn last_read_into(&self, target: &mut T) -> Result<(), SinkError> {
        let last = self.last.as_ref().ok_or(SinkError::Empty)?;
        Ok(envelope::parse(last, target)?)
    }
}

impl<T: Message + Default> Reader<T> {
    pub fn read(&mut self) -> Result<T, SinkError> {
        let mut message = T::default();
        self.read_into(&mut message)?;
        Ok(message)
    }

    pub fn last_read(&self) -> Result<T, SinkError> {
        let mut message = T::default();
        self.last_read_into(&mut message)?;
        Ok(message)
    }
}

/// Writes messages of type `T` into a [`WriterSink`].
pub struct Writer<T> {
    sink: Arc<WriterSink>,
    blocking: bool,
    _marker: PhantomData<fn(T)>,
}

impl<T: Message> Writer<T> {
    pub fn new(sink: Arc<WriterSink>, blocking: bool) -> Self {
        Self {
            sink,
            blocking,
            _marker: PhantomData,
        }
    }

    /// Writer over a connection's outbound sink, using its blocking policy.
    pub fn from_connection<C: Connection + ?Sized>(connection: &C) -> Result<Self, ConnectionError> {
        let sink = connection.writer_sink().ok_or_else(|| {
            ConnectionError::InvalidArgument(format!(
                "connection '{}' has no writer sink",
                connection.configuration().name()
            ))
        })?;
        Ok(Self::new(sink, blocking_policy(connection)))
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn write(&self, message: &T) -> Result<(), SinkError> {
        let envelope = envelope::create(message)?;
        self.sink.push(envelope, self.blocking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modkit_protocol::envelope::{JsonMessage, JsonPayload, RawMessage};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        item: String,
    }

    impl JsonPayload for Order {
        const TYPE_NAME: &'static str = "modkit.test.Order";
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Refund {
        id: u64,
    }

    impl JsonPayload for Refund {
        const TYPE_NAME: &'static str = "modkit.test.Refund";
    }

    fn order(id: u64) -> JsonMessage<Order> {
        JsonMessage::new(Order {
            id,
            item: "widget".to_string(),
        })
    }

    /// Moves everything from a writer sink into a reader sink.
    fn transfer(from: &WriterSink, to: &ReaderSink) {
        while let Some(envelope) = from.pop() {
            to.put(envelope).unwrap();
        }
    }

    #[test]
    fn test_write_then_read() {
        let outbound = Arc::new(WriterSink::new());
        let inbound = Arc::new(ReaderSink::new());

        let writer = Writer::<JsonMessage<Order>>::new(outbound.clone(), false);
        writer.write(&order(1)).unwrap();
        writer.write(&order(2)).unwrap();
        transfer(&outbound, &inbound);

        let mut reader = Reader::<JsonMessage<Order>>::new(inbound, true);
        assert_eq!(reader.read().unwrap(), order(1));
        assert_eq!(reader.read().unwrap(), order(2));
        assert_eq!(reader.last_read().unwrap(), order(2));
    }

    #[test]
    fn test_non_blocking_read_on_empty() {
        let mut reader = Reader::<JsonMessage<Order>>::new(Arc::new(ReaderSink::new()), false);
        assert!(matches!(reader.read(), Err(SinkError::Empty)));
        assert!(matches!(reader.last_read(), Err(SinkError::Empty)));
    }

    #[test]
    fn test_blocking_read_with_timeout() {
        let mut reader = Reader::<JsonMessage<Order>>::new(Arc::new(ReaderSink::new()), true)
            .with_timeout(Duration::from_millis(10));
        assert!(matches!(reader.read(), Err(SinkError::Timeout)));
    }

    #[test]
    fn test_conversion_failure_still_consumes() {
        let sink = Arc::new(ReaderSink::new());
        sink.put(envelope::create(&JsonMessage::new(Refund { id: 9 })).unwrap())
            .unwrap();
        sink.put(envelope::create(&order(3)).unwrap()).unwrap();

        let mut reader = Reader::<JsonMessage<Order>>::new(sink.clone(), false);
        assert!(matches!(reader.read(), Err(SinkError::Conversion(_))));
        assert_eq!(reader.read().unwrap(), order(3));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_read_fails_in_handler_mode() {
        let sink = Arc::new(ReaderSink::new());
        sink.put(envelope::create(&order(1)).unwrap()).unwrap();
        sink.add_message_handler();

        let mut reader = Reader::<JsonMessage<Order>>::new(sink, true);
        assert!(matches!(reader.read(), Err(SinkError::HandlerActive)));
    }

    #[test]
    fn test_raw_reader_with_expected_identity() {
        let sink = Arc::new(ReaderSink::new());
        sink.put(envelope::create(&order(4)).unwrap()).unwrap();

        let mut reader = Reader::<RawMessage>::new(sink, false);
        let mut raw = RawMessage::expecting("JSON", "modkit.test.Order");
        reader.read_into(&mut raw).unwrap();
        let decoded: Order = serde_json::from_slice(raw.payload()).unwrap();
        assert_eq!(decoded.id, 4);
    }

    #[test]
    fn test_write_to_drained_sink_fails() {
        let sink = Arc::new(WriterSink::new());
        sink.drain();
        let writer = Writer::<JsonMessage<Order>>::new(sink, true);
        assert!(matches!(writer.write(&order(1)), Err(SinkError::Drained)));
    }
}
