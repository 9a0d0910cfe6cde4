//! Payment gateway reached through the relay on the second CDC port.
//!
//! Each call writes one request line and waits for the reply line that
//! answers it. The whole exchange is bounded by [`GATEWAY_CALL_TIMEOUT`] so a
//! silent relay looks the same to the session as a slow HTTP backend. A reply
//! that arrives after its call timed out is skipped: the next call first
//! waits out [`RESYNC_WINDOW`] and then ignores lines that do not answer it.

use core::fmt::Write as _;

use embassy_time::{Duration, Timer, with_timeout};
use heapless::String;
use vending_core::gateway::wire::{self, MAX_LINE_LEN, Request};
use vending_core::gateway::{
    ChargeReceipt, GATEWAY_CALL_TIMEOUT, GatewayError, PaymentGateway, StatusReport,
};
use vending_core::session::Amount;

use crate::clock::to_embassy;
use crate::line::{Feed, LineAssembler};
use crate::port::SerialPort;

type Line = String<MAX_LINE_LEN>;

/// Quiet period before the first request after a timeout.
const RESYNC_WINDOW: Duration = Duration::from_millis(300);

pub struct LinkGateway {
    port: &'static SerialPort,
    assembler: LineAssembler<MAX_LINE_LEN>,
    request: String<{ MAX_LINE_LEN + 2 }>,
    resync: bool,
}

impl LinkGateway {
    pub const fn new(port: &'static SerialPort) -> Self {
        Self {
            port,
            assembler: LineAssembler::new(),
            request: String::new(),
            resync: false,
        }
    }

    async fn exchange(&mut self, request: Request<'_>) -> Result<Line, GatewayError> {
        if !self.port.is_connected() {
            return Err(GatewayError::Unreachable);
        }

        if core::mem::take(&mut self.resync) {
            Timer::after(RESYNC_WINDOW).await;
        }
        let stale = self.port.discard_input();
        if stale > 0 {
            defmt::warn!("link: discarded {} stale frames", stale);
        }
        self.assembler.clear();

        self.request.clear();
        write!(self.request, "{request}\r\n").map_err(|_| GatewayError::Malformed)?;
        defmt::debug!("link: > {}", self.request.trim_end());

        match with_timeout(to_embassy(GATEWAY_CALL_TIMEOUT), self.round_trip(request)).await {
            Ok(reply) => reply,
            Err(_) => {
                defmt::warn!("link: no reply within {} ms", GATEWAY_CALL_TIMEOUT.as_millis());
                self.resync = true;
                Err(GatewayError::Timeout)
            }
        }
    }

    async fn round_trip(&mut self, request: Request<'_>) -> Result<Line, GatewayError> {
        self.port.write(&self.request).await;

        loop {
            let frame = self.port.rx.receive().await;
            for byte in frame {
                match self.assembler.feed(byte) {
                    Feed::Pending => {}
                    Feed::Overflow => {
                        defmt::warn!("link: reply exceeded {} bytes", MAX_LINE_LEN);
                        return Err(GatewayError::Malformed);
                    }
                    Feed::Ready => {
                        let reply = self
                            .assembler
                            .take_line()
                            .map_err(|_| GatewayError::Malformed)?;
                        defmt::debug!("link: < {}", reply.as_str());
                        let stray = wire::parse_response(&reply)
                            .is_ok_and(|response| !response.answers(&request));
                        if stray {
                            defmt::warn!("link: skipping stray reply");
                            continue;
                        }
                        return Ok(reply);
                    }
                }
            }
        }
    }
}

impl PaymentGateway for LinkGateway {
    async fn create_charge(
        &mut self,
        amount: Amount,
        description: &str,
    ) -> Result<ChargeReceipt, GatewayError> {
        let reply = self
            .exchange(Request::Create {
                amount,
                description,
            })
            .await?;
        wire::parse_response(&reply)?.into_receipt()
    }

    async fn query_status(&mut self, payment_id: &str) -> Result<StatusReport, GatewayError> {
        let reply = self.exchange(Request::Status(payment_id)).await?;
        wire::parse_response(&reply)?.into_status_report(payment_id)
    }

    async fn cancel(&mut self, payment_id: &str) -> Result<(), GatewayError> {
        let reply = self.exchange(Request::Cancel(payment_id)).await?;
        wire::parse_response(&reply)?.into_ack()
    }
}
