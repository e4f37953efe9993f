#![deny(clippy::unwrap_used, clippy::expect_used)]

mod cache;
mod common;
mod error;
mod glif;
mod guideline;
mod names;
mod plist;
mod ufo;
mod writer;

pub use crate::{
    cache::{
        engine_version, garbage_images, ModTimes, IMAGE_REFERENCES_LIB_KEY, MOD_TIMES_LIB_KEY,
    },
    common::{format_float, normalize_color_string},
    error::NormalizerError,
    glif::normalize_glif,
    names::{
        is_illegal_character, user_name_to_file_name, MAX_FILE_NAME_LENGTH, RESERVED_FILE_NAMES,
    },
    plist::Value,
    ufo::normalize_ufo,
    writer::{normalize_property_list, Attr, XmlWriter},
};
