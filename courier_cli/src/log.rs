use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Logger, Root},
    encode::pattern::PatternEncoder,
    Config, Handle,
};

const PATTERN: &str = "{d(%m-%d %H:%M:%S)} {h({l:<5})} {t} - {m}{n}";

fn build_config(level: LevelFilter) -> anyhow::Result<Config> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        // sqlx logs every statement at info
        .logger(Logger::builder().build("sqlx", LevelFilter::Warn))
        .logger(Logger::builder().build("reqwest", LevelFilter::Info))
        .build(Root::builder().appender("stdout").build(level))?;
    Ok(config)
}

pub fn init_log4rs(level: LevelFilter) -> anyhow::Result<Handle> {
    Ok(log4rs::init_config(build_config(level)?)?)
}

pub fn set_level(handle: &Handle, level: LevelFilter) -> anyhow::Result<()> {
    handle.set_config(build_config(level)?);
    Ok(())
}
