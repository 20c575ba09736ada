// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use env_logger::{Builder, Env, Logger};
use log::{Level, Log, Metadata, Record};
use parking_lot::Mutex;

/// Forwards to `env_logger` and keeps every message logged at error level.
pub(crate) struct ErrorLogger {
    inner: Logger,
    errors: &'static Mutex<Vec<String>>,
}

impl ErrorLogger {
    /// Install the logger for this test binary.
    pub(crate) fn install(errors: &'static Mutex<Vec<String>>) {
        let inner = Builder::from_env(Env::default()).is_test(true).build();
        let max_level = inner.filter();

        match log::set_boxed_logger(Box::new(Self { inner, errors })) {
            Ok(()) => log::set_max_level(max_level),
            Err(error) => panic!("unable to install error logger: {error}"),
        }
    }
}

impl Log for ErrorLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        // errors are kept even if the filter hides them
        metadata.level() == Level::Error || self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if record.level() == Level::Error {
            self.errors
                .lock()
                .push(format!("{}: {}", record.target(), record.args()));
        }
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}
