//! Typed dispatch
//!
//! Adapts a node-level wire message to exactly one of the five typed
//! envelopes and invokes the matching user callback. The discriminator is
//! the pair (has group source, has group destination); the relay shape is
//! selected when a single-to-group message additionally carries both relay
//! fields. A variant without a registered handler is dropped.

use crate::api::functors::TypedMessageFunctors;
use crate::message::{
    Cacheable, GroupId, GroupSource, GroupToGroupMessage, GroupToSingleMessage, SingleId,
    SingleRelaySource, SingleSource, SingleToGroupMessage, SingleToGroupRelayMessage,
    SingleToSingleMessage,
};
use crate::id::NodeId;
use crate::protocol::WireMessage;
use tracing::debug;

fn cacheable_of(message: &WireMessage) -> Cacheable {
    Cacheable::from(message.cacheable.unwrap_or(0))
}

fn contents_of(message: &WireMessage) -> Vec<u8> {
    message.data.first().cloned().unwrap_or_default()
}

fn group_of(raw: &Option<Vec<u8>>) -> Option<GroupId> {
    raw.as_deref().and_then(NodeId::from_slice).map(GroupId)
}

/// Classify `message` and invoke the registered handler for its variant
pub fn invoke_typed_message_functor(message: &WireMessage, functors: &TypedMessageFunctors) {
    let group_source = group_of(&message.group_source);
    let group_destination = group_of(&message.group_destination);

    match (group_source, group_destination) {
        (None, None) => {
            let (Some(source), Some(destination)) = (message.source(), message.destination())
            else {
                return debug!("Typed message missing addressing, dropped");
            };
            if let Some(handler) = &functors.single_to_single {
                handler(SingleToSingleMessage {
                    contents: contents_of(message),
                    source: SingleSource(source),
                    destination: SingleId(destination),
                    cacheable: cacheable_of(message),
                });
            } else {
                debug!("No single-to-single handler registered, dropped");
            }
        }
        (None, Some(destination)) => {
            // The relay shape carries both relay fields alongside the group
            if let (Some(relay_id), Some(relay_connection)) =
                (message.relay(), message.relay_connection())
            {
                if let Some(handler) = &functors.single_to_group_relay {
                    let Some(relay_node) = message.source() else {
                        return debug!("Relay message missing relay node id, dropped");
                    };
                    handler(SingleToGroupRelayMessage {
                        contents: contents_of(message),
                        source: SingleRelaySource {
                            origin: SingleSource(relay_id),
                            connection_id: relay_connection,
                            relay_node: SingleSource(relay_node),
                        },
                        destination,
                        cacheable: cacheable_of(message),
                    });
                } else {
                    debug!("No single-to-group-relay handler registered, dropped");
                }
                return;
            }
            let Some(source) = message.source() else {
                return debug!("Typed message missing source, dropped");
            };
            if let Some(handler) = &functors.single_to_group {
                handler(SingleToGroupMessage {
                    contents: contents_of(message),
                    source: SingleSource(source),
                    destination,
                    cacheable: cacheable_of(message),
                });
            } else {
                debug!("No single-to-group handler registered, dropped");
            }
        }
        (Some(group), None) => {
            let (Some(sender), Some(destination)) = (message.source(), message.destination())
            else {
                return debug!("Typed message missing addressing, dropped");
            };
            if let Some(handler) = &functors.group_to_single {
                handler(GroupToSingleMessage {
                    contents: contents_of(message),
                    source: GroupSource {
                        group_id: group,
                        sender_id: SingleId(sender),
                    },
                    destination: SingleId(destination),
                    cacheable: cacheable_of(message),
                });
            } else {
                debug!("No group-to-single handler registered, dropped");
            }
        }
        (Some(group), Some(destination)) => {
            let Some(sender) = message.source() else {
                return debug!("Typed message missing sender, dropped");
            };
            if let Some(handler) = &functors.group_to_group {
                handler(GroupToGroupMessage {
                    contents: contents_of(message),
                    source: GroupSource {
                        group_id: group,
                        sender_id: SingleId(sender),
                    },
                    destination,
                    cacheable: cacheable_of(message),
                });
            } else {
                debug!("No group-to-group handler registered, dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn node_level(source: Option<NodeId>, destination: NodeId) -> WireMessage {
        WireMessage {
            msg_type: Some(MessageType::NodeLevel as i32),
            request: Some(true),
            direct: Some(true),
            source_id: source.map(|id| id.to_vec()),
            destination_id: Some(destination.to_vec()),
            id: Some(1),
            data: vec![b"typed".to_vec()],
            hops_to_live: Some(5),
            ..WireMessage::default()
        }
    }

    #[test]
    fn discriminates_on_group_fields() {
        let seen = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let mut functors = TypedMessageFunctors::default();
        for (slot, label) in ["s2s", "s2g", "g2s", "g2g", "relay"].iter().enumerate() {
            let seen = Arc::clone(&seen);
            let record = move || seen.lock().push(*label);
            match slot {
                0 => {
                    functors.single_to_single = Some(Arc::new(move |_| record()));
                }
                1 => {
                    functors.single_to_group = Some(Arc::new(move |_| record()));
                }
                2 => {
                    functors.group_to_single = Some(Arc::new(move |_| record()));
                }
                3 => {
                    functors.group_to_group = Some(Arc::new(move |_| record()));
                }
                _ => {
                    functors.single_to_group_relay = Some(Arc::new(move |_| record()));
                }
            }
        }

        let source = NodeId::random();
        let destination = NodeId::random();
        let group = NodeId::random();

        let plain = node_level(Some(source), destination);
        invoke_typed_message_functor(&plain, &functors);

        let mut to_group = plain.clone();
        to_group.group_destination = Some(group.to_vec());
        invoke_typed_message_functor(&to_group, &functors);

        let mut from_group = plain.clone();
        from_group.group_source = Some(group.to_vec());
        invoke_typed_message_functor(&from_group, &functors);

        let mut both = to_group.clone();
        both.group_source = Some(group.to_vec());
        invoke_typed_message_functor(&both, &functors);

        let mut relayed = to_group.clone();
        relayed.relay_id = Some(NodeId::random().to_vec());
        relayed.relay_connection_id = Some(NodeId::random().to_vec());
        invoke_typed_message_functor(&relayed, &functors);

        assert_eq!(*seen.lock(), vec!["s2s", "s2g", "g2s", "g2g", "relay"]);
    }

    #[test]
    fn unregistered_variant_is_dropped() {
        let functors = TypedMessageFunctors::default();
        let message = node_level(Some(NodeId::random()), NodeId::random());
        // Nothing registered: must not panic
        invoke_typed_message_functor(&message, &functors);
    }
}
