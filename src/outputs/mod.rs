//! Output generation and delivery.
//!
//! # Submodules
//!
//! - [`document`]: renders candidates into strict XHTML documents
//! - [`convert`]: runs the external e-reader converter over the documents
//! - [`archive`]: packs documents and cached images into a timestamped zip
//! - [`mail`]: sends the archive to the configured recipient
//! - [`cleanup`]: removes generated files after a successful delivery
//!
//! # Output Structure
//!
//! ```text
//! out_dir/
//! ├── cnbeta.html
//! ├── zhihu.html
//! ├── v2ex.html
//! ├── images/
//! │   ├── 9f86d081….jpg      # sha256 of the image URL
//! │   └── 2c26b46b….png
//! └── kindle_1715000000000.zip
//! ```

pub mod archive;
pub mod cleanup;
pub mod convert;
pub mod document;
pub mod mail;
