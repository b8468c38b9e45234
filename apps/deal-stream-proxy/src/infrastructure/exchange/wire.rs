//! Push Wrapper Wire Schema
//!
//! `prost` representations of the exchange's binary push frames. Only the
//! aggregated-deals body is modelled; other bodies are skipped as unknown
//! fields.

use prost::Message;

use crate::domain::streaming::{Deal, DecodedWrapper};

/// Top-level push frame.
#[derive(Clone, PartialEq, Message)]
pub struct PushWrapper {
    /// Channel the frame was published on.
    #[prost(string, tag = "1")]
    pub channel: String,

    /// Exchange-native symbol.
    #[prost(string, optional, tag = "3")]
    pub symbol: Option<String>,

    /// Exchange-internal symbol id.
    #[prost(string, optional, tag = "4")]
    pub symbol_id: Option<String>,

    /// Creation time in milliseconds.
    #[prost(int64, optional, tag = "5")]
    pub create_time: Option<i64>,

    /// Send time in milliseconds.
    #[prost(int64, optional, tag = "6")]
    pub send_time: Option<i64>,

    /// Frame body.
    #[prost(oneof = "Body", tags = "314")]
    pub body: Option<Body>,
}

/// Frame body variants.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Body {
    /// Aggregated deals.
    #[prost(message, tag = "314")]
    Deals(DealsContainer),
}

/// Aggregated deals body.
#[derive(Clone, PartialEq, Message)]
pub struct DealsContainer {
    /// Individual deals.
    #[prost(message, repeated, tag = "1")]
    pub deals: Vec<DealItem>,

    /// Event type, e.g. `spot@public.aggre.deals.v3.api.pb@100ms`.
    #[prost(string, tag = "2")]
    pub event_type: String,
}

/// A single deal.
#[derive(Clone, PartialEq, Message)]
pub struct DealItem {
    /// Price as a decimal string.
    #[prost(string, tag = "1")]
    pub price: String,

    /// Quantity as a decimal string.
    #[prost(string, tag = "2")]
    pub quantity: String,

    /// Side (1 = buy, 2 = sell).
    #[prost(int32, tag = "3")]
    pub trade_type: i32,

    /// Trade time in milliseconds; zero when absent.
    #[prost(int64, tag = "4")]
    pub time: i64,
}

impl PushWrapper {
    /// Whether the parse produced anything a consumer could use.
    #[must_use]
    pub fn is_meaningful(&self) -> bool {
        !self.channel.is_empty()
            || self.symbol.as_deref().is_some_and(|s| !s.is_empty())
            || matches!(&self.body, Some(Body::Deals(c)) if !c.deals.is_empty())
    }
}

impl From<DealItem> for Deal {
    fn from(item: DealItem) -> Self {
        Self {
            price: item.price,
            quantity: item.quantity,
            trade_type: item.trade_type,
            time: (item.time != 0).then_some(item.time),
        }
    }
}

impl From<PushWrapper> for DecodedWrapper {
    fn from(wrapper: PushWrapper) -> Self {
        let (deals, event_type) = match wrapper.body {
            Some(Body::Deals(container)) => (
                container.deals.into_iter().map(Deal::from).collect(),
                Some(container.event_type).filter(|e| !e.is_empty()),
            ),
            None => (Vec::new(), None),
        };

        Self {
            channel: Some(wrapper.channel).filter(|c| !c.is_empty()),
            symbol: wrapper.symbol,
            symbol_id: wrapper.symbol_id,
            create_time: wrapper.create_time,
            send_time: wrapper.send_time,
            event_type,
            deals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_converts_to_domain() {
        let wrapper = PushWrapper {
            channel: "spot@public.aggre.deals.v3.api.pb@100ms@BTCUSDT".to_string(),
            symbol: Some("BTCUSDT".to_string()),
            symbol_id: None,
            create_time: None,
            send_time: Some(1_700_000_000_000),
            body: Some(Body::Deals(DealsContainer {
                deals: vec![DealItem {
                    price: "27000.12".to_string(),
                    quantity: "0.5".to_string(),
                    trade_type: 1,
                    time: 0,
                }],
                event_type: "spot@public.aggre.deals.v3.api.pb@100ms".to_string(),
            })),
        };

        let decoded = DecodedWrapper::from(wrapper);
        assert_eq!(decoded.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(decoded.deals.len(), 1);
        assert_eq!(decoded.deals[0].time, None);
        assert_eq!(
            decoded.event_type.as_deref(),
            Some("spot@public.aggre.deals.v3.api.pb@100ms")
        );
    }

    #[test]
    fn empty_wrapper_is_not_meaningful() {
        assert!(!PushWrapper::default().is_meaningful());

        let deals_only = PushWrapper {
            body: Some(Body::Deals(DealsContainer::default())),
            ..Default::default()
        };
        assert!(!deals_only.is_meaningful());
    }

    #[test]
    fn encoded_length_matches_wire_layout() {
        let wrapper = PushWrapper {
            channel: "spot@public.aggre.deals.v3.api.pb@100ms@BTCUSDT".to_string(),
            symbol: Some("BTCUSDT".to_string()),
            send_time: Some(1_700_000_000_000),
            body: Some(Body::Deals(DealsContainer {
                deals: vec![DealItem {
                    price: "27000.12".to_string(),
                    quantity: "0.5".to_string(),
                    trade_type: 1,
                    time: 1_700_000_000_000,
                }],
                event_type: String::new(),
            })),
            ..Default::default()
        };

        let bytes = wrapper.encode_to_vec();
        assert_eq!(bytes.len(), 94);
        assert_eq!(bytes[0], 0x0A);
        assert_eq!(PushWrapper::decode(bytes.as_slice()).unwrap(), wrapper);
    }
}
