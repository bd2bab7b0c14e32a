//! The ECMA-335 metadata vocabulary shared by the persistence writer and the loader.
//!
//! Nothing in here knows about builders. The modules describe how metadata looks on disk:
//! tokens and tables, heaps, flag sets, signature, custom attribute and marshalling blobs,
//! constants, method bodies, and the headers that locate all of it inside an image.

pub mod constants;
pub mod cor20header;
pub mod customattributes;
pub mod flags;
pub mod heaps;
pub mod identity;
pub mod marshalling;
pub mod method;
pub mod root;
pub mod signatures;
pub mod tables;
pub mod token;
