//! Pure routing of MQTT events for the session event loop
//!
//! The event loop task hands every `rumqttc` event to [`MessageHandler`],
//! which decides what it means for the session without doing any I/O.

use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to the action the session should take
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                    packet_id: suback.pkid,
                    granted: Self::subscription_granted(&suback.return_codes),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: String::from_utf8_lossy(&publish.payload).to_string(),
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => EventRoute::DisconnectedByBroker,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// A SubAck grants the subscription only if every filter succeeded
    pub fn subscription_granted(return_codes: &[SubscribeReasonCode]) -> bool {
        !return_codes.is_empty()
            && return_codes
                .iter()
                .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged,
    /// Broker answered a subscribe request
    SubscriptionAcknowledged { packet_id: u16, granted: bool },
    /// Message delivered on a subscribed topic
    MessageReceived {
        topic: String,
        payload: String,
        retain: bool,
    },
    /// Broker closed the session
    DisconnectedByBroker,
    /// Our DISCONNECT went out; the event loop is done
    DisconnectSent,
    /// PingResp, PubAck and friends
    InfrastructureEvent(String),
    /// Other outgoing packets
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish, SubAck,
    };
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_suback() {
        let granted = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 7,
            return_codes: vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&granted),
            EventRoute::SubscriptionAcknowledged {
                packet_id: 7,
                granted: true
            }
        );

        let rejected = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 8,
            return_codes: vec![SubscribeReasonCode::NotAuthorized],
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&rejected),
            EventRoute::SubscriptionAcknowledged {
                packet_id: 8,
                granted: false
            }
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("sample/topic1"),
            pkid: 1,
            payload: Bytes::from("Hello World!"),
            properties: None,
        }));

        assert_eq!(
            MessageHandler::route_mqtt_event(&publish),
            EventRoute::MessageReceived {
                topic: "sample/topic1".to_string(),
                payload: "Hello World!".to_string(),
                retain: false,
            }
        );
    }

    #[test]
    fn test_route_disconnects() {
        let incoming = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&incoming),
            EventRoute::DisconnectedByBroker
        );

        let outgoing = Event::Outgoing(Outgoing::Disconnect);
        assert_eq!(
            MessageHandler::route_mqtt_event(&outgoing),
            EventRoute::DisconnectSent
        );
    }

    #[test]
    fn test_route_outgoing() {
        let outgoing = Event::Outgoing(Outgoing::PingReq);
        assert_eq!(
            MessageHandler::route_mqtt_event(&outgoing),
            EventRoute::OutgoingEvent
        );
    }

    #[test]
    fn test_subscription_granted() {
        assert!(MessageHandler::subscription_granted(&[
            SubscribeReasonCode::Success(QoS::AtMostOnce),
            SubscribeReasonCode::Success(QoS::AtLeastOnce),
        ]));
        assert!(!MessageHandler::subscription_granted(&[
            SubscribeReasonCode::Success(QoS::AtLeastOnce),
            SubscribeReasonCode::Unspecified,
        ]));
        assert!(!MessageHandler::subscription_granted(&[]));
    }
}
