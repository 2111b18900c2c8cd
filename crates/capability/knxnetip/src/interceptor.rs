use crate::ValueCache;
use crate::frames::{group_indication, tunneling_ack};
use async_trait::async_trait;
use plc_codec::knxnetip::{ApduData, KnxNetIpMessage};
use plc_dispatch::{FrameInterceptor, MessageDispatcher};
use std::sync::Arc;
use tracing::{debug, warn};

/// 隧道请求钩子。
///
/// 本通道的每个 TunnelingRequest 先回确认，再解析：GroupValueWrite / GroupValueResponse
/// 写入值缓存；只有 GroupValueResponse 继续交给期望匹配（读请求在等它）。
pub(crate) struct TunnelInterceptor {
    channel_id: u8,
    cache: Arc<ValueCache>,
}

impl TunnelInterceptor {
    pub(crate) fn new(channel_id: u8, cache: Arc<ValueCache>) -> Self {
        Self { channel_id, cache }
    }
}

#[async_trait]
impl FrameInterceptor<KnxNetIpMessage> for TunnelInterceptor {
    async fn intercept(
        &self,
        dispatcher: &MessageDispatcher<KnxNetIpMessage>,
        message: KnxNetIpMessage,
    ) -> Option<KnxNetIpMessage> {
        let sequence_counter = match &message {
            KnxNetIpMessage::TunnelingRequest { header, .. } if header.channel_id == self.channel_id => {
                header.sequence_counter
            }
            KnxNetIpMessage::TunnelingRequest { header, .. } => {
                warn!(
                    target: "plc.knxnetip",
                    channel_id = header.channel_id,
                    "tunneling request for another channel, dropping"
                );
                return None;
            }
            _ => return Some(message),
        };

        if let Err(err) = dispatcher
            .send(&tunneling_ack(self.channel_id, sequence_counter))
            .await
        {
            warn!(target: "plc.knxnetip", sequence_counter, "failed to acknowledge tunneling request: {}", err);
        }

        let (update, pass_through) = match group_indication(&message, self.channel_id) {
            Some((address, data @ ApduData::GroupValueWrite { .. })) => {
                (data.payload().map(|payload| (address, payload)), false)
            }
            Some((address, data @ ApduData::GroupValueResponse { .. })) => {
                (data.payload().map(|payload| (address, payload)), true)
            }
            _ => (None, false),
        };
        if let Some((address, payload)) = update {
            self.cache.update(address, payload);
        }
        if pass_through {
            Some(message)
        } else {
            debug!(target: "plc.knxnetip", sequence_counter, "tunneling_request_consumed");
            None
        }
    }
}
