//! Assertion macros shared by integration tests.

/// Await a pull future and panic with contextual diagnostics on failure.
#[macro_export]
macro_rules! pull_expect {
    ($fut:expr) => {{
        $fut.await
            .expect(concat!("pull failed at ", file!(), ":", line!()))
    }};
    ($fut:expr, $msg:expr) => {{
        let m = ::std::format!("{msg} at {}:{}", file!(), line!(), msg = $msg);
        $fut.await.expect(&m)
    }};
}

/// Await a `next_message` future, expecting a message.
#[macro_export]
macro_rules! next_expect {
    ($fut:expr) => {{
        $fut.await
            .expect(concat!("next_message failed at ", file!(), ":", line!()))
            .expect(concat!("batch ended early at ", file!(), ":", line!()))
    }};
}

/// Await a `next_message` future, expecting the batch to have ended.
#[macro_export]
macro_rules! end_expect {
    ($fut:expr) => {{
        let next = $fut
            .await
            .expect(concat!("next_message failed at ", file!(), ":", line!()));
        assert!(
            next.is_none(),
            "expected end of batch at {}:{}, got {next:?}",
            file!(),
            line!()
        );
    }};
}

pub use crate::{end_expect, next_expect, pull_expect};
