//! Logging host function implementation.
//!
//! Scripts log through the logger capability they were granted at bootstrap.
//! Every line is kept in the [`ScriptContext`] and forwarded to the chain
//! [`Logger`], which applies its verbosity threshold.

use toolscript_common::{LogLevel, Logger};
use toolscript_core::ScriptContext;

/// Host implementation of the logger service.
pub struct LoggingHost;

impl LoggingHost {
    /// Record `message` from the script and emit it through `logger`.
    ///
    /// Returns `true` if the logger emitted it.
    pub fn log(ctx: &mut ScriptContext, logger: &Logger, level: LogLevel, message: &str) -> bool {
        ctx.log(level, message.to_string());
        logger.log(level, &ctx.script, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolscript_common::ExecutionConfig;

    #[test]
    fn test_logging_stores_in_context() {
        let mut ctx = ScriptContext::new("Echo", &ExecutionConfig::default(), false);
        let logger = Logger::new("chain");

        assert!(LoggingHost::log(&mut ctx, &logger, LogLevel::Info, "Hello"));
        assert!(LoggingHost::log(&mut ctx, &logger, LogLevel::Error, "World"));

        assert_eq!(ctx.logs.len(), 2);
        assert_eq!(ctx.logs[0].message, "Hello");
        assert_eq!(ctx.logs[1].level, LogLevel::Error);
    }

    #[test]
    fn test_verbosity_filters_emission_only() {
        let mut ctx = ScriptContext::new("Echo", &ExecutionConfig::default(), false);
        let logger = Logger::new("chain").with_min_level(LogLevel::Warn);

        assert!(!LoggingHost::log(&mut ctx, &logger, LogLevel::Debug, "quiet"));
        assert!(LoggingHost::log(&mut ctx, &logger, LogLevel::Warn, "loud"));
        assert_eq!(ctx.logs.len(), 2);
    }
}
