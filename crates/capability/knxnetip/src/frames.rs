//! 隧道帧构造与匹配

use crate::KnxGroupAddress;
use domain::ResponseCode;
use plc_codec::knxnetip::{
    Apdu, ApduData, Cemi, KnxAddress, KnxNetIpMessage, LDataFrame, LDataMessage, Status,
    TunnelingRequestDataBlock, TunnelingResponseDataBlock,
};

/// L_Data.req 组报文。
pub(crate) fn group_request(
    channel_id: u8,
    sequence_counter: u8,
    source: KnxAddress,
    destination: KnxGroupAddress,
    data: ApduData,
) -> KnxNetIpMessage {
    KnxNetIpMessage::TunnelingRequest {
        header: TunnelingRequestDataBlock {
            channel_id,
            sequence_counter,
        },
        cemi: Cemi::LDataReq(LDataMessage::new(LDataFrame::group(
            source,
            destination.to_bytes(),
            Apdu::data(data),
        ))),
    }
}

pub(crate) fn tunneling_ack(channel_id: u8, sequence_counter: u8) -> KnxNetIpMessage {
    KnxNetIpMessage::TunnelingResponse {
        header: TunnelingResponseDataBlock {
            channel_id,
            sequence_counter,
            status: Status::NoError,
        },
    }
}

/// 本通道上发往组地址的 L_Data.ind 数据帧：`(目标地址, APDU 数据)`。
pub(crate) fn group_indication(message: &KnxNetIpMessage, channel_id: u8) -> Option<(u16, &ApduData)> {
    let KnxNetIpMessage::TunnelingRequest {
        header,
        cemi: Cemi::LDataInd(l_data),
    } = message
    else {
        return None;
    };
    let frame = &l_data.frame;
    if header.channel_id != channel_id || !frame.group_address {
        return None;
    }
    match &frame.apdu {
        Apdu::Data { data, .. } => Some((frame.destination_u16(), data)),
        Apdu::Control { .. } => None,
    }
}

/// 指定组地址的 GroupValueResponse 值。
pub(crate) fn group_value_response(
    message: &KnxNetIpMessage,
    channel_id: u8,
    address: u16,
) -> Option<Vec<u8>> {
    match group_indication(message, channel_id)? {
        (destination, data @ ApduData::GroupValueResponse { .. }) if destination == address => {
            data.payload()
        }
        _ => None,
    }
}

/// 网关对本通道某序号请求的确认状态。
pub(crate) fn tunneling_ack_status(
    message: &KnxNetIpMessage,
    channel_id: u8,
    sequence_counter: u8,
) -> Option<Status> {
    match message {
        KnxNetIpMessage::TunnelingResponse { header }
            if header.channel_id == channel_id && header.sequence_counter == sequence_counter =>
        {
            Some(header.status)
        }
        _ => None,
    }
}

/// 网关拒绝状态对应的字段响应码。
pub(crate) fn status_response_code(status: Status) -> ResponseCode {
    match status {
        Status::NoError => ResponseCode::Ok,
        Status::NoMoreConnections | Status::NoMoreUniqueConnections => ResponseCode::RemoteBusy,
        Status::ProtocolTypeNotSupported
        | Status::UnsupportedProtocolVersion
        | Status::ConnectionTypeNotSupported
        | Status::ConnectionOptionNotSupported
        | Status::TunnellingLayerNotSupported => ResponseCode::Unsupported,
        _ => ResponseCode::RemoteError,
    }
}
