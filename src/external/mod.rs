pub mod cloud_storage;
pub mod identity_toolkit;

use crate::error::{invalid_input_error, upstream_error, Error};

/// Client errors are the caller's fault; anything else non-200 is the provider's.
fn check_status(status_code: u16) -> Result<(), Error> {
    if (400..500).contains(&status_code) {
        return Err(invalid_input_error());
    } else if status_code != 200 {
        return Err(upstream_error());
    }

    Ok(())
}
