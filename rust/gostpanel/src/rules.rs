use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

const DEFAULT_PROTOCOL: &str = "tcp";
const DEFAULT_LOCAL_ADDR: &str = "127.0.0.1";
const DEFAULT_LOCAL_PORT: &str = "8080";
const DEFAULT_REMOTE_ADDR: &str = "example.com";
const DEFAULT_REMOTE_PORT: &str = "80";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            "http" => Some(Protocol::Http),
            "https" => Some(Protocol::Https),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One forwarding mapping, stored exactly as it was submitted.
///
/// Ports stay strings so the rules file keeps the shape older installs wrote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub protocol: Protocol,
    pub local_addr: String,
    #[serde(deserialize_with = "text_or_number")]
    pub local_port: String,
    pub remote_addr: String,
    #[serde(deserialize_with = "text_or_number")]
    pub remote_port: String,
}

impl ForwardingRule {
    /// `-L` argument for the forwarder: `proto://local_addr:local_port`.
    pub fn listen_spec(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.local_addr, self.local_port)
    }

    /// `-F` argument for the forwarder: `proto://remote_addr:remote_port`.
    pub fn forward_spec(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.remote_addr, self.remote_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("all fields are required ({0} is empty)")]
    MissingField(&'static str),

    #[error("ports must be numbers between 1 and 65535 ({field}: {value:?})")]
    InvalidPort { field: &'static str, value: String },

    #[error("unknown protocol {0:?} (expected tcp, udp, http or https)")]
    InvalidProtocol(String),

    #[error("address must not contain whitespace ({field}: {value:?})")]
    InvalidAddress { field: &'static str, value: String },
}

/// Raw rule fields as they arrive from the page form or the JSON API.
///
/// A field that is absent falls back to the form's default value; a field
/// that is present but blank is rejected. Ports may be sent as JSON numbers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleInput {
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub local_addr: Option<String>,
    #[serde(default, deserialize_with = "opt_text_or_number")]
    pub local_port: Option<String>,
    #[serde(default)]
    pub remote_addr: Option<String>,
    #[serde(default, deserialize_with = "opt_text_or_number")]
    pub remote_port: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Text {
    Str(String),
    Num(serde_json::Number),
}

impl From<Text> for String {
    fn from(t: Text) -> Self {
        match t {
            Text::Str(s) => s,
            Text::Num(n) => n.to_string(),
        }
    }
}

fn text_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Text::deserialize(d).map(String::from)
}

fn opt_text_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Text>::deserialize(d)?.map(String::from))
}

impl RuleInput {
    pub fn validate(&self) -> Result<ForwardingRule, RuleError> {
        let protocol = field(&self.protocol, DEFAULT_PROTOCOL, "protocol")?;
        let local_addr = field(&self.local_addr, DEFAULT_LOCAL_ADDR, "local_addr")?;
        let local_port = field(&self.local_port, DEFAULT_LOCAL_PORT, "local_port")?;
        let remote_addr = field(&self.remote_addr, DEFAULT_REMOTE_ADDR, "remote_addr")?;
        let remote_port = field(&self.remote_port, DEFAULT_REMOTE_PORT, "remote_port")?;

        check_port(&local_port, "local_port")?;
        check_port(&remote_port, "remote_port")?;

        let protocol = Protocol::parse(&protocol).ok_or(RuleError::InvalidProtocol(protocol))?;

        check_addr(&local_addr, "local_addr")?;
        check_addr(&remote_addr, "remote_addr")?;

        Ok(ForwardingRule {
            protocol,
            local_addr,
            local_port,
            remote_addr,
            remote_port,
        })
    }
}

fn field(v: &Option<String>, default: &str, name: &'static str) -> Result<String, RuleError> {
    let v = v.as_deref().unwrap_or(default).trim();
    if v.is_empty() {
        return Err(RuleError::MissingField(name));
    }
    Ok(v.to_string())
}

fn check_port(v: &str, name: &'static str) -> Result<(), RuleError> {
    let bad = || RuleError::InvalidPort { field: name, value: v.to_string() };
    if !v.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    match v.parse::<u16>() {
        Ok(p) if p != 0 => Ok(()),
        _ => Err(bad()),
    }
}

fn check_addr(v: &str, name: &'static str) -> Result<(), RuleError> {
    if v.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RuleError::InvalidAddress { field: name, value: v.to_string() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(proto: &str, la: &str, lp: &str, ra: &str, rp: &str) -> RuleInput {
        RuleInput {
            protocol: Some(proto.to_string()),
            local_addr: Some(la.to_string()),
            local_port: Some(lp.to_string()),
            remote_addr: Some(ra.to_string()),
            remote_port: Some(rp.to_string()),
        }
    }

    #[test]
    fn valid_input_is_trimmed_and_kept_verbatim() {
        let rule = input(" UDP ", " 0.0.0.0", "5353 ", "dns.example", "53").validate().unwrap();
        assert_eq!(
            rule,
            ForwardingRule {
                protocol: Protocol::Udp,
                local_addr: "0.0.0.0".into(),
                local_port: "5353".into(),
                remote_addr: "dns.example".into(),
                remote_port: "53".into(),
            }
        );
    }

    #[test]
    fn absent_fields_take_form_defaults() {
        let rule = RuleInput::default().validate().unwrap();
        assert_eq!(rule.protocol, Protocol::Tcp);
        assert_eq!(rule.local_addr, "127.0.0.1");
        assert_eq!(rule.local_port, "8080");
        assert_eq!(rule.remote_addr, "example.com");
        assert_eq!(rule.remote_port, "80");
    }

    #[test]
    fn blank_field_is_missing() {
        let err = input("tcp", "   ", "80", "a", "80").validate().unwrap_err();
        assert_eq!(err, RuleError::MissingField("local_addr"));
    }

    #[test]
    fn ports_must_be_numeric_and_in_range() {
        for bad in ["http", "-1", "8o", "1.5", "0", "65536", "+80"] {
            let err = input("tcp", "a", bad, "b", "80").validate().unwrap_err();
            assert!(matches!(err, RuleError::InvalidPort { field: "local_port", .. }), "{bad}");
        }
        let err = input("tcp", "a", "80", "b", "x").validate().unwrap_err();
        assert!(matches!(err, RuleError::InvalidPort { field: "remote_port", .. }));
        assert!(input("tcp", "a", "65535", "b", "1").validate().is_ok());
    }

    #[test]
    fn unknown_protocol_rejected() {
        let err = input("socks5", "a", "1", "b", "2").validate().unwrap_err();
        assert_eq!(err, RuleError::InvalidProtocol("socks5".into()));
    }

    #[test]
    fn address_with_inner_space_rejected() {
        let err = input("tcp", "a b", "1", "b", "2").validate().unwrap_err();
        assert!(matches!(err, RuleError::InvalidAddress { field: "local_addr", .. }));
    }

    #[test]
    fn specs_are_formatted_per_protocol() {
        let rule = input("https", "127.0.0.1", "8443", "example.com", "443").validate().unwrap();
        assert_eq!(rule.listen_spec(), "https://127.0.0.1:8443");
        assert_eq!(rule.forward_spec(), "https://example.com:443");
    }

    #[test]
    fn numeric_ports_validate_like_text() {
        let inp: RuleInput = serde_json::from_str(r#"{"local_port":8080,"remote_port":"443"}"#).unwrap();
        let rule = inp.validate().unwrap();
        assert_eq!(rule.local_port, "8080");
        assert_eq!(rule.remote_port, "443");

        let inp: RuleInput = serde_json::from_str(r#"{"local_port":-1}"#).unwrap();
        assert!(matches!(inp.validate(), Err(RuleError::InvalidPort { field: "local_port", .. })));

        let inp: RuleInput = serde_json::from_str(r#"{"local_port":null}"#).unwrap();
        assert_eq!(inp.validate().unwrap().local_port, "8080");
    }

    #[test]
    fn stored_rule_accepts_numeric_port() {
        let rule: ForwardingRule = serde_json::from_str(
            r#"{"protocol":"tcp","local_addr":"a","local_port":1080,"remote_addr":"b","remote_port":"80"}"#,
        )
        .unwrap();
        assert_eq!(rule.local_port, "1080");
        assert!(serde_json::to_string(&rule).unwrap().contains(r#""local_port":"1080""#));
    }

    #[test]
    fn protocol_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Protocol::Https).unwrap(), "\"https\"");
        let p: Protocol = serde_json::from_str("\"udp\"").unwrap();
        assert_eq!(p, Protocol::Udp);
    }
}
