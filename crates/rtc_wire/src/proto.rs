//! Protobuf frames exchanged between participants and the broker, generated
//! from `proto/link.proto`.

include!(concat!(env!("OUT_DIR"), "/rtc_wire.rs"));

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use prost::Message;

    #[test]
    fn test_reply_signal_keeps_routing_fields() {
        let frame = ClientFrame {
            event: Some(client_frame::Event::LiveSignal(Signal {
                kind: SignalKind::Answer as i32,
                target_id: "stream-1".to_string(),
                payload: Bytes::from_static(b"sdp"),
                to: Some("conn-9".to_string()),
                viewer_tag: None,
            })),
        };

        let decoded = ClientFrame::decode(frame.encode_to_vec().as_slice()).unwrap();
        let Some(client_frame::Event::LiveSignal(signal)) = decoded.event else {
            panic!("expected a live signal");
        };
        assert_eq!(signal.kind(), SignalKind::Answer);
        assert_eq!(signal.to.as_deref(), Some("conn-9"));
        assert!(signal.viewer_tag.is_none());
        assert_eq!(signal.payload, Bytes::from_static(b"sdp"));
    }

    #[test]
    fn test_unknown_role_value_is_rejected() {
        assert_eq!(Role::try_from(2), Ok(Role::Provider));
        assert!(Role::try_from(7).is_err());
    }
}
