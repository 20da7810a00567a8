//! Protobuf messages stored in a tablet's footer. Defined with the
//! `prost` derive macro so the crate builds without a protoc toolchain;
//! the wire format is identical to the equivalent `.proto` schema.

pub mod tablet {
    /// One node of the pre-order flattened schema tree. `kind` and
    /// `scalar_kind` carry the crate-side enum discriminants;
    /// `offsets` lists the node's stream-descriptor offsets in role
    /// order (see the schema module for the per-kind layout).
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SchemaNode {
        #[prost(uint32, tag = "1")]
        pub kind: u32,
        #[prost(uint32, tag = "2")]
        pub scalar_kind: u32,
        #[prost(string, tag = "3")]
        pub name: ::prost::alloc::string::String,
        #[prost(uint32, tag = "4")]
        pub children: u32,
        #[prost(uint32, repeated, tag = "5")]
        pub offsets: ::prost::alloc::vec::Vec<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Schema {
        #[prost(message, repeated, tag = "1")]
        pub nodes: ::prost::alloc::vec::Vec<SchemaNode>,
        #[prost(uint32, tag = "2")]
        pub stream_count: u32,
    }

    /// Location of one stream inside its stripe. Zero-length entries
    /// mark streams with no data in that stripe.
    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct StreamEntry {
        #[prost(uint32, tag = "1")]
        pub offset: u32,
        #[prost(uint32, tag = "2")]
        pub length: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct StripeMetadata {
        #[prost(uint64, tag = "1")]
        pub offset: u64,
        #[prost(uint32, tag = "2")]
        pub size: u32,
        #[prost(uint32, tag = "3")]
        pub row_count: u32,
        #[prost(message, repeated, tag = "4")]
        pub streams: ::prost::alloc::vec::Vec<StreamEntry>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MetadataEntry {
        #[prost(string, tag = "1")]
        pub key: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub value: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Footer {
        #[prost(message, optional, tag = "1")]
        pub schema: ::core::option::Option<Schema>,
        #[prost(message, repeated, tag = "2")]
        pub stripes: ::prost::alloc::vec::Vec<StripeMetadata>,
        #[prost(message, repeated, tag = "3")]
        pub metadata: ::prost::alloc::vec::Vec<MetadataEntry>,
        #[prost(uint64, tag = "4")]
        pub row_count: u64,
    }
}
