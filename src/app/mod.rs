mod cache;
mod config;
mod crawl;
mod data_io;
mod error;
mod extract;
mod runtime;
mod session;
mod types;
mod webdriver;

#[cfg(test)]
mod fake;

pub use runtime::run;
