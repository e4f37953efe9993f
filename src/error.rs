use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizerError {
    #[error("Input path is not a UFO: {path:?}")]
    NotAUfo { path: PathBuf },

    #[error("Required metainfo.plist file not in {path:?}")]
    MissingMetaInfo { path: PathBuf },

    #[error("Required formatVersion value not defined in metainfo.plist in {path:?}")]
    MissingFormatVersion { path: PathBuf },

    #[error("Required formatVersion value not properly formatted in metainfo.plist in {path:?}")]
    BadFormatVersion { path: PathBuf },

    #[error("Unsupported UFO format ({version}) in {path:?}")]
    UnsupportedFormatVersion { version: i64, path: PathBuf },

    #[error("Undefined GLIF format: {path:?}")]
    UndefinedGlifFormat { path: PathBuf },

    #[error("Improperly formatted GLIF format version: {path:?}")]
    BadGlifFormat { path: PathBuf },

    #[error("Error parsing property list: {0}")]
    Plist(String),

    #[error("Malformed layercontents.plist in {path:?}")]
    MalformedLayerContents { path: PathBuf },

    #[error("No unique file name could be found for {name:?}")]
    NameTranslation { name: String },

    #[error("Error parsing XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("IO Error: {0}")]
    IO(#[from] io::Error),
}
