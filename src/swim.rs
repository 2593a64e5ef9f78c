//! Failure-detection / membership datagram shapes, carried here only as
//! inert wire structs: the gossip state machine that sends and interprets
//! them lives in the replication overlay, external to this crate. These
//! types exist so a caller gluing this crate to that overlay has a
//! serde-derived, bit-exact representation to decode into and encode out
//! of, not because the core runs the protocol itself.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// The address/port a gossip datagram is routed through, present on every
/// datagram's meta map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "SRC_ADDRESS")]
    pub src_address: IpAddr,
    #[serde(rename = "SRC_PORT")]
    pub src_port: u16,
    #[serde(rename = "DST_ADDRESS")]
    pub dst_address: IpAddr,
    #[serde(rename = "DST_PORT")]
    pub dst_port: u16,
}

/// The meta map every datagram is prefixed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "TARANTOOL_VERSION")]
    pub tarantool_version: String,
    #[serde(rename = "SRC_ADDRESS")]
    pub src_address: IpAddr,
    #[serde(rename = "SRC_PORT")]
    pub src_port: u16,
    #[serde(rename = "ROUTING", skip_serializing_if = "Option::is_none", default)]
    pub routing: Option<Route>,
}

/// A cluster member's status as carried in a member record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Alive,
    Suspect,
    Dead,
    Left,
}

/// One entry of an `ANTI_ENTROPY` or `DISSEMINATION` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(rename = "STATUS")]
    pub status: MemberStatus,
    #[serde(rename = "ADDRESS")]
    pub address: IpAddr,
    #[serde(rename = "PORT")]
    pub port: u16,
    #[serde(rename = "INCARNATION")]
    pub incarnation: u64,
    #[serde(rename = "PAYLOAD", skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<serde_bytes::ByteBuf>,
}

/// The `FAILURE_DETECTION` section of a datagram's payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetection {
    #[serde(rename = "MSG_TYPE")]
    pub msg_type: FailureDetectionMsgType,
    #[serde(rename = "INCARNATION")]
    pub incarnation: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureDetectionMsgType {
    Ping,
    Ack,
}

/// A datagram's payload map: any combination of anti-entropy, failure
/// detection and dissemination sections may be present at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Payload {
    #[serde(rename = "ANTI_ENTROPY", skip_serializing_if = "Option::is_none", default)]
    pub anti_entropy: Option<Vec<Member>>,
    #[serde(rename = "FAILURE_DETECTION", skip_serializing_if = "Option::is_none", default)]
    pub failure_detection: Option<FailureDetection>,
    #[serde(rename = "DISSEMINATION", skip_serializing_if = "Option::is_none", default)]
    pub dissemination: Option<Vec<Member>>,
}

/// One full gossip datagram: a meta map followed by a payload map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub meta: Meta,
    pub payload: Payload,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::from([a, b, c, d])
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = Envelope {
            meta: Meta {
                tarantool_version: "2.11.0".into(),
                src_address: addr(127, 0, 0, 1),
                src_port: 3301,
                routing: None,
            },
            payload: Payload {
                anti_entropy: Some(vec![Member {
                    status: MemberStatus::Alive,
                    address: addr(10, 0, 0, 2),
                    port: 3302,
                    incarnation: 4,
                    payload: None,
                }]),
                failure_detection: Some(FailureDetection {
                    msg_type: FailureDetectionMsgType::Ping,
                    incarnation: 4,
                }),
                dissemination: None,
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, back);
    }

    #[test]
    fn absent_optional_sections_are_omitted() {
        let payload = Payload::default();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn routing_is_only_present_when_the_datagram_is_forwarded() {
        let meta = Meta {
            tarantool_version: "2.11.0".into(),
            src_address: addr(127, 0, 0, 1),
            src_port: 3301,
            routing: Some(Route {
                src_address: addr(127, 0, 0, 1),
                src_port: 3301,
                dst_address: addr(127, 0, 0, 2),
                dst_port: 3301,
            }),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("ROUTING").is_some());
    }
}
