pub mod archive;
pub mod backup_config;
pub mod command;
pub mod compress;
pub mod context;
pub mod dump;
pub mod encrypt;
pub mod finish;
pub mod pipeline;
pub mod preflight;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod run_log;
pub mod transfer;
pub mod validate;

#[cfg(test)]
pub(crate) mod testutil;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
