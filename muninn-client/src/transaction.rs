//! One HTTP/1.1 request/response exchange over a borrowed socket.
//!
//! `send_request` uploads the request head, then drives the combined pump:
//! the producer feeds request-body chunks through the protocol engine
//! (gated on `Expect: 100-continue`), the consumer parses inbound bytes
//! and aborts the pump the moment the response head arrives. Body bytes
//! that arrive while the request is still uploading are interleaved by
//! [`ResponseBody::next_chunk`], which keeps pumping both directions until
//! the response ends.
//!
//! Only the consumer side ever touches the parser's receive state; the
//! producer side only frames outbound chunks.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::h1::{H1Connection, InboundEvent};
use crate::pool::{ConnectionKey, ConnectionManager};
use crate::request::{BodyChunks, Request};
use crate::response::{Response, ResponseSnapshot};
use crate::transport::{Consumed, Produced, Socket};

pub struct Http11Transaction {
    pub(crate) socket: Socket,
    pub(crate) h1: RefCell<H1Connection>,
    manager: Arc<ConnectionManager>,
    key: ConnectionKey,
    pub(crate) read_timeout: Option<Duration>,
}

impl Http11Transaction {
    pub(crate) fn new(
        socket: Socket,
        h1: H1Connection,
        manager: Arc<ConnectionManager>,
        key: ConnectionKey,
        read_timeout: Option<Duration>,
    ) -> Http11Transaction {
        Http11Transaction { socket, h1: RefCell::new(h1), manager, key, read_timeout }
    }

    /// Sends the request head, then concurrently uploads body chunks while
    /// waiting for the response head. Returns as soon as the final head is
    /// parsed; the body is streamed lazily through the returned Response.
    pub async fn send_request(mut self, request: Request, mut body: BodyChunks) -> Result<Response> {
        let wire = self.h1.get_mut().send_request(
            &request.method,
            &request.target(),
            &request.headers,
        )?;
        self.socket.send_all(&wire).await?;
        trace!(method = %request.method, target = %request.target(), "request head sent");

        let expect_100 = request
            .headers
            .get_one("expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
        let gate = Cell::new(expect_100);
        let head_slot = RefCell::new(None);
        let informational = RefCell::new(Vec::<ResponseSnapshot>::new());

        {
            let h1 = &self.h1;
            let socket = &mut self.socket;
            let body = &mut body;
            drive_until_response_head(
                socket,
                h1,
                body,
                &gate,
                &head_slot,
                &informational,
                self.read_timeout,
            )
            .await?;
        }

        let head = head_slot.into_inner().ok_or_else(|| {
            Error::RemoteProtocol("connection closed before a response was received".into())
        })?;
        // A non-100 response while the gate was still set means the server
        // rejected the body up front; do not upload it.
        let skip_body = gate.get();
        debug!(status = %head.status, skip_body, "response head received");

        let response_body = ResponseBody {
            transaction: Some(self),
            body,
            skip_body,
            request_ended: false,
            response_ended: false,
            finished: false,
        };
        Ok(Response::from_parts(head, request, informational.into_inner(), response_body))
    }
}

/// The send_request pump, split out so the closure borrows stay readable.
async fn drive_until_response_head(
    socket: &mut Socket,
    h1: &RefCell<H1Connection>,
    body: &mut BodyChunks,
    gate: &Cell<bool>,
    head_slot: &RefCell<Option<crate::h1::ResponseHead>>,
    informational: &RefCell<Vec<ResponseSnapshot>>,
    read_timeout: Option<Duration>,
) -> Result<()> {
    socket
        .send_and_receive_for_a_while(
            || {
                // Hold back the body until the 100-continue gate clears.
                if gate.get() {
                    return Ok(Produced::BlockedUntilNextRead);
                }
                match body.next_chunk()? {
                    Some(chunk) => Ok(Produced::Bytes(h1.borrow_mut().send_data(&chunk)?)),
                    // End-of-message is deliberately not sent here; the
                    // response body stream finishes the upload.
                    None => Ok(Produced::Done),
                }
            },
            |bytes| {
                let mut conn = h1.borrow_mut();
                conn.receive_data(bytes);
                loop {
                    match conn.next_event()? {
                        Some(InboundEvent::Informational(head)) => {
                            if head.status.as_u16() == 100 {
                                gate.set(false);
                            }
                            informational.borrow_mut().push(ResponseSnapshot::from_head(&head));
                        }
                        Some(InboundEvent::Head(head)) => {
                            *head_slot.borrow_mut() = Some(head);
                            return Ok(Consumed::Abort);
                        }
                        Some(other) => {
                            return Err(Error::RemoteProtocol(format!(
                                "unexpected {other:?} before response head"
                            )))
                        }
                        None => return Ok(Consumed::Continue),
                    }
                }
            },
            read_timeout,
        )
        .await
}

/// Lazy response body. Drains response `Data` events while continuing to
/// upload whatever is left of the request body; after the response ends,
/// any unfinished upload completes synchronously and the socket either
/// returns to the pool (parser ready for a new cycle) or is closed.
pub struct ResponseBody {
    transaction: Option<Http11Transaction>,
    body: BodyChunks,
    skip_body: bool,
    request_ended: bool,
    response_ended: bool,
    finished: bool,
}

impl ResponseBody {
    /// Yields the next batch of raw (still content-encoded) body bytes, or
    /// `None` at end of message.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            // Drain whatever the parser already holds from the last read.
            let mut drained = BytesMut::new();
            {
                let txn = self.transaction.as_mut().expect("transaction live until finished");
                let mut conn = txn.h1.borrow_mut();
                while !self.response_ended {
                    match conn.next_event() {
                        Ok(Some(InboundEvent::Data(data))) => drained.extend_from_slice(&data),
                        Ok(Some(InboundEvent::EndOfMessage)) => self.response_ended = true,
                        Ok(Some(other)) => {
                            drop(conn);
                            self.abandon();
                            return Err(Error::RemoteProtocol(format!(
                                "unexpected {other:?} in response body"
                            )));
                        }
                        Ok(None) => break,
                        Err(err) => {
                            drop(conn);
                            self.abandon();
                            return Err(err);
                        }
                    }
                }
            }
            if self.response_ended {
                if let Err(err) = self.finish().await {
                    self.abandon();
                    return Err(err);
                }
                self.finished = true;
                return Ok((!drained.is_empty()).then(|| drained.freeze()));
            }
            if !drained.is_empty() {
                return Ok(Some(drained.freeze()));
            }

            // Nothing buffered: pump the socket, uploading request body in
            // parallel with the read.
            let collected = RefCell::new(BytesMut::new());
            let ended = Cell::new(false);
            {
                let txn = self.transaction.as_mut().expect("transaction live until finished");
                let read_timeout = txn.read_timeout;
                let h1 = &txn.h1;
                let socket = &mut txn.socket;
                let body = &mut self.body;
                let request_ended = &mut self.request_ended;
                let skip_body = self.skip_body;

                let result = socket
                    .send_and_receive_for_a_while(
                        || {
                            if *request_ended {
                                return Ok(Produced::Done);
                            }
                            if skip_body {
                                *request_ended = true;
                                // Best effort: chunked bodies can close with
                                // a terminal chunk, short content-length
                                // bodies cannot and will fail the reuse
                                // check later.
                                return match h1.borrow_mut().send_eom() {
                                    Ok(wire) if wire.is_empty() => Ok(Produced::Done),
                                    Ok(wire) => Ok(Produced::Bytes(wire)),
                                    Err(_) => Ok(Produced::Done),
                                };
                            }
                            match body.next_chunk()? {
                                Some(chunk) => {
                                    Ok(Produced::Bytes(h1.borrow_mut().send_data(&chunk)?))
                                }
                                None => {
                                    *request_ended = true;
                                    let wire = h1.borrow_mut().send_eom()?;
                                    if wire.is_empty() {
                                        Ok(Produced::Done)
                                    } else {
                                        Ok(Produced::Bytes(wire))
                                    }
                                }
                            }
                        },
                        |bytes| {
                            let mut conn = h1.borrow_mut();
                            conn.receive_data(bytes);
                            loop {
                                match conn.next_event()? {
                                    Some(InboundEvent::Data(data)) => {
                                        collected.borrow_mut().extend_from_slice(&data)
                                    }
                                    Some(InboundEvent::EndOfMessage) => {
                                        ended.set(true);
                                        return Ok(Consumed::Abort);
                                    }
                                    Some(other) => {
                                        return Err(Error::RemoteProtocol(format!(
                                            "unexpected {other:?} in response body"
                                        )))
                                    }
                                    None => break,
                                }
                            }
                            if collected.borrow().is_empty() {
                                Ok(Consumed::Continue)
                            } else {
                                Ok(Consumed::Abort)
                            }
                        },
                        read_timeout,
                    )
                    .await;

                if let Err(err) = result {
                    self.abandon();
                    return Err(err);
                }
            }

            if ended.get() {
                self.response_ended = true;
            }
            let collected = collected.into_inner();
            if self.response_ended {
                if let Err(err) = self.finish().await {
                    self.abandon();
                    return Err(err);
                }
                self.finished = true;
                return Ok((!collected.is_empty()).then(|| collected.freeze()));
            }
            if !collected.is_empty() {
                return Ok(Some(collected.freeze()));
            }
            // Pump made no body progress (e.g. only request upload moved);
            // go around again.
        }
    }

    /// Finishes any outstanding request upload, then returns the socket to
    /// the pool when the parser can start a fresh cycle, closing it
    /// otherwise.
    async fn finish(&mut self) -> Result<()> {
        let mut txn = self.transaction.take().expect("transaction live until finished");

        if !self.request_ended {
            if self.skip_body {
                if let Ok(wire) = txn.h1.get_mut().send_eom() {
                    if !wire.is_empty() {
                        let _ = txn.socket.send_all(&wire).await;
                    }
                }
                self.request_ended = true;
            } else {
                // The response ended first; complete the upload without
                // interleaving.
                loop {
                    match self.body.next_chunk()? {
                        Some(chunk) => {
                            let wire = txn.h1.get_mut().send_data(&chunk)?;
                            txn.socket.send_all(&wire).await?;
                        }
                        None => {
                            let wire = txn.h1.get_mut().send_eom()?;
                            if !wire.is_empty() {
                                txn.socket.send_all(&wire).await?;
                            }
                            self.request_ended = true;
                            break;
                        }
                    }
                }
            }
        }

        match txn.h1.get_mut().start_next_cycle() {
            Ok(()) => {
                let Http11Transaction { socket, manager, key, .. } = txn;
                manager.release(key, socket).await;
            }
            Err(_) => {
                debug!("connection not reusable, closing");
                txn.socket.forceful_close();
            }
        }
        Ok(())
    }

    /// Drops the socket unreturned; used on errors and cancellation paths
    /// where the connection state is indeterminate.
    fn abandon(&mut self) {
        self.finished = true;
        self.transaction = None;
    }
}
