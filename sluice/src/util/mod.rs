pub(crate) mod common_format;
