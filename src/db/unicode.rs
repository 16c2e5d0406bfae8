//! Unicode case folding for SQLite connections
//!
//! SQLite's `LOWER()`, `LIKE` and `NOCASE` only fold ASCII. Every pooled
//! connection gets a `unicode_lower()` scalar function and a
//! `UNICODE_NOCASE` collation so that Cyrillic names compare the same way
//! Latin ones do.

use std::cmp::Ordering;
use std::ffi::{c_char, c_int};

use libsqlite3_sys as ffi;
use sqlx::SqliteConnection;

/// Scalar function folding its text argument to lower case.
pub const FOLD_FUNCTION: &str = "unicode_lower";

/// Collation comparing text after Unicode lower-casing.
pub const NOCASE_COLLATION: &str = "UNICODE_NOCASE";

/// Case-insensitive comparison backing [NOCASE_COLLATION].
pub fn compare_nocase(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

unsafe extern "C" fn unicode_lower(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    unsafe {
        if argc != 1 {
            ffi::sqlite3_result_null(ctx);
            return;
        }

        let value = *argv;
        if ffi::sqlite3_value_type(value) == ffi::SQLITE_NULL {
            ffi::sqlite3_result_null(ctx);
            return;
        }

        // text must be fetched before its length
        let text = ffi::sqlite3_value_text(value);
        if text.is_null() {
            ffi::sqlite3_result_null(ctx);
            return;
        }
        let len = ffi::sqlite3_value_bytes(value).max(0) as usize;
        let bytes = std::slice::from_raw_parts(text, len);

        let lowered = String::from_utf8_lossy(bytes).to_lowercase();
        ffi::sqlite3_result_text(
            ctx,
            lowered.as_ptr() as *const c_char,
            lowered.len() as c_int,
            ffi::SQLITE_TRANSIENT(),
        );
    }
}

/// Register [FOLD_FUNCTION] on a freshly opened connection.
pub async fn register_functions(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    let mut handle = conn.lock_handle().await?;
    let db = handle.as_raw_handle().as_ptr();

    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            db,
            c"unicode_lower".as_ptr(),
            1,
            ffi::SQLITE_UTF8 | ffi::SQLITE_DETERMINISTIC,
            std::ptr::null_mut(),
            Some(unicode_lower),
            None,
            None,
            None,
        )
    };

    if rc != ffi::SQLITE_OK {
        return Err(sqlx::Error::Configuration(
            format!("Failed to register {} (sqlite code {})", FOLD_FUNCTION, rc).into(),
        ));
    }
    Ok(())
}
