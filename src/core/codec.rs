use crate::core::packet::MAX_PACKET_SIZE;
use crate::error::{constants, DiscoveryError};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Datagram framing for `UdpFramed`.
///
/// Every read buffer is exactly one datagram, so framing reduces to a size check.
/// Content validation is left to the packet codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct DatagramCodec;

impl Decoder for DatagramCodec {
    type Item = Bytes;
    type Error = DiscoveryError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        if src.len() > MAX_PACKET_SIZE {
            src.clear();
            return Err(DiscoveryError::MalformedPacket(
                constants::ERR_PACKET_TOO_LARGE.into(),
            ));
        }
        Ok(Some(src.split().freeze()))
    }
}

impl Encoder<Bytes> for DatagramCodec {
    type Error = DiscoveryError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_PACKET_SIZE {
            return Err(DiscoveryError::MalformedPacket(
                constants::ERR_PACKET_TOO_LARGE.into(),
            ));
        }
        dst.reserve(item.len());
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_datagram_passes_through() {
        let mut codec = DatagramCodec;
        let mut buf = BytesMut::from(&[1u8, 2, 3][..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), &[1, 2, 3]);
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversize_datagram_rejected_and_discarded() {
        let mut codec = DatagramCodec;
        let mut buf = BytesMut::from(&vec![0u8; MAX_PACKET_SIZE + 1][..]);
        assert!(codec.decode(&mut buf).is_err());
        assert!(buf.is_empty());

        let mut out = BytesMut::new();
        assert!(codec
            .encode(Bytes::from(vec![0u8; MAX_PACKET_SIZE + 1]), &mut out)
            .is_err());
    }
}
