//! SASL sequencing during capability negotiation.
//!
//! Nothing is requested before the final `CAP LS` line. The handler then
//! requests `sasl`, selects the mechanism, sends the chunked payload when
//! the server answers `AUTHENTICATE +` and finishes on the outcome numeric.

use tracing::{debug, info, warn};

use super::{cap_value, canonical_cap_name, CapHandler, CapLsLine};
use crate::error::Result;
use crate::sasl::{
    authenticate_lines, encode_external, encode_plain, parse_mechanisms, SaslMechanism, SaslNumeric,
};
use crate::transport::{RawCommand, RawSender, ServerId};

/// How a SASL attempt ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaslOutcome {
    /// 903.
    Success,
    /// 902/904/905/906/907 with the numeric code.
    Failed(u16),
    /// The server does not offer `sasl`.
    NotOffered,
    /// The server offers `sasl` but not our mechanism.
    MechanismUnavailable,
    /// `sasl` was NAKed.
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Idle,
    AwaitingAck,
    AwaitingChallenge,
    AwaitingResult,
    Done,
}

/// Drives one SASL exchange per negotiation.
pub struct MultiSaslHandler {
    username: String,
    secret: String,
    mechanism: SaslMechanism,
    offered: Option<Option<String>>,
    server_mechanisms: Vec<SaslMechanism>,
    step: Step,
    outcome: Option<SaslOutcome>,
}

impl std::fmt::Debug for MultiSaslHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiSaslHandler")
            .field("username", &self.username)
            .field("mechanism", &self.mechanism)
            .field("step", &self.step)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl MultiSaslHandler {
    /// `use_external` selects EXTERNAL (client certificate) regardless of
    /// `mechanism`.
    pub fn new(
        username: impl Into<String>,
        secret: impl Into<String>,
        mechanism: &str,
        use_external: bool,
    ) -> Self {
        let mechanism = if use_external {
            SaslMechanism::External
        } else {
            SaslMechanism::parse(mechanism)
        };
        Self {
            username: username.into(),
            secret: secret.into(),
            mechanism,
            offered: None,
            server_mechanisms: Vec::new(),
            step: Step::Idle,
            outcome: None,
        }
    }

    pub fn mechanism(&self) -> &SaslMechanism {
        &self.mechanism
    }

    /// The outcome, once finished.
    pub fn outcome(&self) -> Option<&SaslOutcome> {
        self.outcome.as_ref()
    }

    /// Mechanisms the server listed (`sasl=` value or 908).
    pub fn server_mechanisms(&self) -> &[SaslMechanism] {
        &self.server_mechanisms
    }

    fn payload(&self) -> String {
        match self.mechanism {
            SaslMechanism::External => encode_external(None),
            _ => encode_plain(&self.username, &self.secret),
        }
    }

    fn finish(&mut self, server_id: &ServerId, outcome: SaslOutcome) -> bool {
        if self.step == Step::Done {
            return false;
        }
        match &outcome {
            SaslOutcome::Success => info!(server = %server_id, mechanism = %self.mechanism, "SASL authentication succeeded"),
            other => warn!(server = %server_id, mechanism = %self.mechanism, outcome = ?other, "SASL authentication did not complete"),
        }
        self.step = Step::Done;
        self.outcome = Some(outcome);
        true
    }
}

impl CapHandler for MultiSaslHandler {
    fn handle_ls(&mut self, sender: &dyn RawSender, server_id: &ServerId, line: &CapLsLine) -> Result<bool> {
        if self.step != Step::Idle {
            return Ok(false);
        }
        if let Some(token) = line.tokens.iter().find(|t| canonical_cap_name(t) == "sasl") {
            self.offered = Some(cap_value(token).map(str::to_owned));
        }
        if !line.is_final {
            return Ok(false);
        }
        let Some(value) = self.offered.clone() else {
            return Ok(self.finish(server_id, SaslOutcome::NotOffered));
        };
        if let Some(list) = value.filter(|v| !v.is_empty()) {
            self.server_mechanisms = parse_mechanisms(&list);
            if !self.server_mechanisms.contains(&self.mechanism) {
                return Ok(self.finish(server_id, SaslOutcome::MechanismUnavailable));
            }
        }
        if !self.mechanism.is_supported() {
            return Ok(self.finish(server_id, SaslOutcome::MechanismUnavailable));
        }
        sender.send_raw(server_id, "CAP REQ :sasl")?;
        self.step = Step::AwaitingAck;
        Ok(false)
    }

    fn handle_ack(&mut self, sender: &dyn RawSender, server_id: &ServerId, caps: &[String]) -> Result<bool> {
        if self.step != Step::AwaitingAck || !caps.iter().any(|c| canonical_cap_name(c) == "sasl") {
            return Ok(false);
        }
        sender.send_raw(server_id, &format!("AUTHENTICATE {}", self.mechanism))?;
        debug!(server = %server_id, mechanism = %self.mechanism, "starting SASL exchange");
        self.step = Step::AwaitingChallenge;
        Ok(false)
    }

    fn handle_nak(&mut self, _sender: &dyn RawSender, server_id: &ServerId, caps: &[String]) -> Result<bool> {
        if self.step != Step::AwaitingAck || !caps.iter().any(|c| canonical_cap_name(c) == "sasl") {
            return Ok(false);
        }
        Ok(self.finish(server_id, SaslOutcome::Rejected))
    }

    fn handle_other(&mut self, sender: &dyn RawSender, server_id: &ServerId, command: &RawCommand) -> Result<bool> {
        if self.step == Step::Done {
            return Ok(false);
        }
        if command.command == "AUTHENTICATE" {
            if self.step == Step::AwaitingChallenge && command.param(0) == Some("+") {
                for line in authenticate_lines(&self.payload()) {
                    sender.send_raw(server_id, &line)?;
                }
                self.step = Step::AwaitingResult;
            }
            return Ok(false);
        }
        let Some(code) = command.numeric() else {
            return Ok(false);
        };
        match SaslNumeric::from_code(code) {
            Some(SaslNumeric::Success) => Ok(self.finish(server_id, SaslOutcome::Success)),
            Some(SaslNumeric::Failure) if self.step != Step::Idle => {
                Ok(self.finish(server_id, SaslOutcome::Failed(code)))
            }
            Some(SaslNumeric::Mechanisms) => {
                self.server_mechanisms = parse_mechanisms(command.param(1).unwrap_or_default());
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn is_finished(&self) -> bool {
        self.step == Step::Done
    }

    fn sasl_outcome(&self) -> Option<&SaslOutcome> {
        self.outcome.as_ref()
    }

    fn reset(&mut self) {
        self.offered = None;
        self.server_mechanisms.clear();
        self.step = Step::Idle;
        self.outcome = None;
    }
}
