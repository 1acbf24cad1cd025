pub mod backup_config;
pub mod compress;
pub mod domain_filter;
pub mod encrypt;
pub mod file_ext;
pub mod finish;
pub mod fs_backup;
pub mod hypervisor;
pub mod image;
pub mod layout;
pub mod logging;
pub mod notifications;
pub mod process;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod validate;
pub mod vm_backup;

#[cfg(test)]
pub(crate) mod testing;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
