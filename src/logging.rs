use flexi_logger::{
    Cleanup, Criterion, Duplicate, FileSpec, FlexiLoggerError, Logger, LoggerHandle, Naming,
    WriteMode, detailed_format,
};

/// Initialize the logger with a `log` filter spec such as `"debug"` or
/// `"riscv_priv_core::isa::riscv::mmu=trace"`.
/// Must keep the [`LoggerHandle`] (returned value) alive up to the very end of your program
/// to ensure that all buffered log lines are flushed out.
pub fn init(spec: &str) -> Result<LoggerHandle, FlexiLoggerError> {
    Logger::try_with_str(spec)?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .basename("riscv-priv-core")
                .suffix("log"),
        )
        .rotate(
            Criterion::Size(10_000_000), // 10 MB
            Naming::Numbers,
            Cleanup::KeepLogFiles(3),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .duplicate_to_stderr(Duplicate::Warn)
        .format_for_files(detailed_format)
        .start()
}
