//! ksync core: annotated property values and typed extraction.
//!
//! Property values arrive from the orchestrator wrapped in liveness and
//! secrecy annotations. This crate decodes them to plain JSON, walks them by
//! path, and extracts typed structs while tracking what the extracted data
//! depended on.

#![forbid(unsafe_code)]

mod de;
pub mod decode;
pub mod error;
pub mod extract;
pub mod path;
pub mod traverse;
pub mod value;

pub use decode::{decode, decode_value};
pub use error::{ExtractError, PathParseError, PropertyError};
pub use extract::{extract, ExtractOptions, ExtractResult};
pub use path::{PathComponent, PropertyPath};
pub use traverse::traverse;
pub use value::{Archive, Asset, Output, PropertyMap, PropertyValue, Urn};

pub mod prelude {
    pub use super::{
        decode, extract, traverse, ExtractError, ExtractOptions, ExtractResult, PropertyMap, PropertyPath,
        PropertyValue, Urn,
    };
}
