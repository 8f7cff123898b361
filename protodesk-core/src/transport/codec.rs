//! # JSON <-> Protobuf Codec
//!
//! Implements `tonic::codec::Codec` over `serde_json::Value`, so the transport can send and
//! receive JSON without generated Rust types.
//!
//! * **Encoding**: the JSON value is deserialized into a `prost_reflect::DynamicMessage` of the
//!   method's input type (which rejects JSON that doesn't fit the schema) and written as
//!   Protobuf bytes.
//! * **Decoding**: bytes are merged into a `DynamicMessage` of the output type and turned back
//!   into JSON. Field names are kept as declared in the `.proto` file, so responses line up
//!   with what the schema extractor and the validator report.
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor, SerializeOptions};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

pub struct JsonCodec {
    request: MessageDescriptor,
    response: MessageDescriptor,
}

impl JsonCodec {
    pub fn new(request: MessageDescriptor, response: MessageDescriptor) -> Self {
        Self { request, response }
    }

    pub fn for_method(method: &MethodDescriptor) -> Self {
        Self::new(method.input(), method.output())
    }
}

impl Codec for JsonCodec {
    type Encode = serde_json::Value;
    type Decode = serde_json::Value;

    type Encoder = JsonEncoder;
    type Decoder = JsonDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        JsonEncoder(self.request.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonDecoder(self.response.clone())
    }
}

pub struct JsonEncoder(MessageDescriptor);

impl Encoder for JsonEncoder {
    type Item = serde_json::Value;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        let msg = DynamicMessage::deserialize(self.0.clone(), item).map_err(|e| {
            Status::invalid_argument(format!(
                "JSON does not match message '{}': {}",
                self.0.full_name(),
                e
            ))
        })?;

        msg.encode_raw(dst);
        Ok(())
    }
}

pub struct JsonDecoder(MessageDescriptor);

impl Decoder for JsonDecoder {
    type Item = serde_json::Value;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut msg = DynamicMessage::new(self.0.clone());
        msg.merge(src)
            .map_err(|e| Status::internal(format!("Failed to decode Protobuf bytes: {}", e)))?;

        let options = SerializeOptions::new().use_proto_field_name(true);
        let value = msg
            .serialize_with_options(serde_json::value::Serializer, &options)
            .map_err(|e| Status::internal(format!("Failed to map response to JSON: {}", e)))?;

        Ok(Some(value))
    }
}
