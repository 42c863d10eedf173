//! WebSocket JSON protocol
//!
//! Inbound commands are validated against a per-command field schema before
//! anything touches the state machine. Outbound messages are small fixed-shape
//! JSON objects serialized into bounded strings.

use crate::{BoardError, config};
use serde::{Deserialize, Serialize};

/// Bounded outbound message text
pub type MessageText = heapless::String<{ config::MAX_MESSAGE_LEN }>;

/// Mode change requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRequest {
    On,
    Off,
    Blink { hz: u32 },
    Breathe { period_ms: u32 },
}

/// Validated client command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetMode(ModeRequest),
    SetBrightness(u8),
    GetStatus,
}

/// Reason a command was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRequest {
    InvalidJson,
    MissingCmd,
    MissingMode,
    MissingDuty,
    UnknownCmd,
    UnknownMode,
    UnknownField(&'static str),
}

impl BadRequest {
    /// Error code carried in the error event
    pub fn code(&self) -> &'static str {
        "bad_request"
    }

    /// Human-readable reason carried in the error event
    pub fn message(&self) -> &'static str {
        match self {
            BadRequest::InvalidJson => "invalid json",
            BadRequest::MissingCmd => "missing cmd",
            BadRequest::MissingMode => "missing mode",
            BadRequest::MissingDuty => "missing duty",
            BadRequest::UnknownCmd => "unknown cmd",
            BadRequest::UnknownMode => "unknown mode",
            BadRequest::UnknownField("hz") => "unknown field hz",
            BadRequest::UnknownField("period_ms") => "unknown field period_ms",
            BadRequest::UnknownField("duty") => "unknown field duty",
            BadRequest::UnknownField("mode") => "unknown field mode",
            BadRequest::UnknownField(_) => "unknown field",
        }
    }
}

/// Wire shape of a command; every field is optional so the schema check can
/// name what is missing or extra.
///
/// Strictness covers the protocol's own vocabulary only: `mode`, `hz`,
/// `period_ms` and `duty` are rejected on commands they do not belong to.
/// Keys the protocol never defines (client tags, request ids) are skipped by
/// the deserializer and never reach validation.
#[derive(Debug, Deserialize)]
struct RawCommand<'a> {
    #[serde(default, borrow)]
    cmd: Option<&'a str>,
    #[serde(default, borrow)]
    mode: Option<&'a str>,
    #[serde(default)]
    hz: Option<i64>,
    #[serde(default)]
    period_ms: Option<i64>,
    #[serde(default)]
    duty: Option<i64>,
}

impl RawCommand<'_> {
    fn reject_present(&self, fields: &[&'static str]) -> Result<(), BadRequest> {
        for &field in fields {
            let present = match field {
                "mode" => self.mode.is_some(),
                "hz" => self.hz.is_some(),
                "period_ms" => self.period_ms.is_some(),
                "duty" => self.duty.is_some(),
                _ => false,
            };
            if present {
                return Err(BadRequest::UnknownField(field));
            }
        }
        Ok(())
    }
}

fn clamp_hz(hz: Option<i64>) -> u32 {
    match hz {
        Some(hz) => hz.clamp(config::MIN_BLINK_HZ as i64, u32::MAX as i64) as u32,
        None => config::DEFAULT_BLINK_HZ,
    }
}

fn clamp_period(period_ms: Option<i64>) -> u32 {
    match period_ms {
        Some(period) => period.clamp(config::MIN_BREATHE_PERIOD_MS as i64, u32::MAX as i64) as u32,
        None => config::DEFAULT_BREATHE_PERIOD_MS,
    }
}

fn clamp_duty(duty: i64) -> u8 {
    duty.clamp(0, 255) as u8
}

/// Parse and validate one inbound text message
pub fn parse_command(payload: &[u8]) -> Result<Command, BadRequest> {
    let (raw, _) = serde_json_core::from_slice::<RawCommand<'_>>(payload)
        .map_err(|_| BadRequest::InvalidJson)?;

    let cmd = raw.cmd.ok_or(BadRequest::MissingCmd)?;
    match cmd {
        "set_mode" => {
            let mode = raw.mode.ok_or(BadRequest::MissingMode)?;
            let request = match mode {
                "on" => {
                    raw.reject_present(&["hz", "period_ms", "duty"])?;
                    ModeRequest::On
                }
                "off" => {
                    raw.reject_present(&["hz", "period_ms", "duty"])?;
                    ModeRequest::Off
                }
                "blink" => {
                    raw.reject_present(&["period_ms", "duty"])?;
                    ModeRequest::Blink {
                        hz: clamp_hz(raw.hz),
                    }
                }
                "breathe" => {
                    raw.reject_present(&["hz", "duty"])?;
                    ModeRequest::Breathe {
                        period_ms: clamp_period(raw.period_ms),
                    }
                }
                _ => return Err(BadRequest::UnknownMode),
            };
            Ok(Command::SetMode(request))
        }
        "set_brightness" => {
            let duty = raw.duty.ok_or(BadRequest::MissingDuty)?;
            raw.reject_present(&["hz", "period_ms", "mode"])?;
            Ok(Command::SetBrightness(clamp_duty(duty)))
        }
        "get_status" => {
            raw.reject_present(&["mode", "hz", "period_ms", "duty"])?;
            Ok(Command::GetStatus)
        }
        _ => Err(BadRequest::UnknownCmd),
    }
}

/// Status event
#[derive(Debug, Clone, Serialize)]
pub struct StatusMessage<'a> {
    pub evt: &'static str,
    pub uptime: u64,
    pub rssi: i32,
    pub mode: &'a str,
    pub hz: u32,
    pub period_ms: u32,
    pub brightness: u8,
    pub dropped: u32,
    pub wifi_clients: u8,
    pub ws_clients: u8,
}

/// Error event, unicast to the requester
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    pub evt: &'static str,
    pub code: &'static str,
    pub msg: &'static str,
}

impl From<BadRequest> for ErrorMessage {
    fn from(err: BadRequest) -> Self {
        Self {
            evt: "error",
            code: err.code(),
            msg: err.message(),
        }
    }
}

/// Backpressure alert, broadcast once receivers return
#[derive(Debug, Clone, Serialize)]
pub struct AlertMessage {
    pub evt: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub dropped: u32,
}

impl AlertMessage {
    pub fn backpressure(dropped: u32) -> Self {
        Self {
            evt: "alert",
            kind: "backpressure",
            dropped,
        }
    }
}

/// Serialize an outbound message
pub fn encode<T: Serialize>(message: &T) -> Result<MessageText, BoardError> {
    serde_json_core::to_string::<_, { config::MAX_MESSAGE_LEN }>(message)
        .map_err(|_| BoardError::ProtocolError)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Command, BadRequest> {
        parse_command(text.as_bytes())
    }

    #[test]
    fn accepts_each_command() {
        assert_eq!(
            parse(r#"{"cmd":"set_mode","mode":"on"}"#),
            Ok(Command::SetMode(ModeRequest::On))
        );
        assert_eq!(
            parse(r#"{"cmd":"set_mode","mode":"breathe","period_ms":900}"#),
            Ok(Command::SetMode(ModeRequest::Breathe { period_ms: 900 }))
        );
        assert_eq!(
            parse(r#"{"cmd":"set_brightness","duty":12}"#),
            Ok(Command::SetBrightness(12))
        );
        assert_eq!(parse(r#"{"cmd":"get_status"}"#), Ok(Command::GetStatus));
    }

    #[test]
    fn missing_parameters_use_defaults() {
        assert_eq!(
            parse(r#"{"cmd":"set_mode","mode":"blink"}"#),
            Ok(Command::SetMode(ModeRequest::Blink { hz: 2 }))
        );
        assert_eq!(
            parse(r#"{"cmd":"set_mode","mode":"breathe"}"#),
            Ok(Command::SetMode(ModeRequest::Breathe { period_ms: 1500 }))
        );
    }

    #[test]
    fn numeric_fields_are_clamped() {
        assert_eq!(
            parse(r#"{"cmd":"set_mode","mode":"blink","hz":0}"#),
            Ok(Command::SetMode(ModeRequest::Blink { hz: 1 }))
        );
        assert_eq!(
            parse(r#"{"cmd":"set_mode","mode":"breathe","period_ms":-5}"#),
            Ok(Command::SetMode(ModeRequest::Breathe { period_ms: 200 }))
        );
        assert_eq!(
            parse(r#"{"cmd":"set_brightness","duty":999}"#),
            Ok(Command::SetBrightness(255))
        );
        assert_eq!(
            parse(r#"{"cmd":"set_brightness","duty":-1}"#),
            Ok(Command::SetBrightness(0))
        );
    }

    #[test]
    fn rejects_fields_foreign_to_the_mode() {
        assert_eq!(
            parse(r#"{"cmd":"set_mode","mode":"on","hz":5}"#),
            Err(BadRequest::UnknownField("hz"))
        );
        assert_eq!(
            parse(r#"{"cmd":"set_mode","mode":"off","period_ms":500}"#),
            Err(BadRequest::UnknownField("period_ms"))
        );
        assert_eq!(
            parse(r#"{"cmd":"set_mode","mode":"blink","period_ms":500}"#),
            Err(BadRequest::UnknownField("period_ms"))
        );
        assert_eq!(
            parse(r#"{"cmd":"set_mode","mode":"breathe","hz":3}"#),
            Err(BadRequest::UnknownField("hz"))
        );
        assert_eq!(
            parse(r#"{"cmd":"set_brightness","duty":3,"period_ms":500}"#),
            Err(BadRequest::UnknownField("period_ms"))
        );
    }

    #[test]
    fn reports_missing_and_unknown_values() {
        assert_eq!(parse("{not json"), Err(BadRequest::InvalidJson));
        assert_eq!(parse(r#"{"mode":"on"}"#), Err(BadRequest::MissingCmd));
        assert_eq!(parse(r#"{"cmd":"set_mode"}"#), Err(BadRequest::MissingMode));
        assert_eq!(
            parse(r#"{"cmd":"set_mode","mode":"disco"}"#),
            Err(BadRequest::UnknownMode)
        );
        assert_eq!(
            parse(r#"{"cmd":"set_brightness"}"#),
            Err(BadRequest::MissingDuty)
        );
        assert_eq!(parse(r#"{"cmd":"reboot"}"#), Err(BadRequest::UnknownCmd));
    }

    #[test]
    fn wrong_field_type_is_invalid_json() {
        assert_eq!(
            parse(r#"{"cmd":"set_brightness","duty":"high"}"#),
            Err(BadRequest::InvalidJson)
        );
    }

    #[test]
    fn unrelated_keys_are_ignored() {
        assert_eq!(
            parse(r#"{"cmd":"get_status","client":"web"}"#),
            Ok(Command::GetStatus)
        );
        assert_eq!(
            parse(r#"{"cmd":"set_mode","mode":"on","id":7}"#),
            Ok(Command::SetMode(ModeRequest::On))
        );
        // Protocol keys stay strict even next to foreign ones
        assert_eq!(
            parse(r#"{"cmd":"get_status","client":"web","hz":1}"#),
            Err(BadRequest::UnknownField("hz"))
        );
    }

    #[test]
    fn error_event_shape() {
        let text = encode(&ErrorMessage::from(BadRequest::UnknownField("hz"))).unwrap();
        assert_eq!(
            text.as_str(),
            r#"{"evt":"error","code":"bad_request","msg":"unknown field hz"}"#
        );
    }

    #[test]
    fn alert_event_shape() {
        let text = encode(&AlertMessage::backpressure(3)).unwrap();
        assert_eq!(
            text.as_str(),
            r#"{"evt":"alert","type":"backpressure","dropped":3}"#
        );
    }
}
