use std::io::{self, Write};

use serde::Serialize;

use crate::app::{DownloadResult, StudyCard, SubmitResult};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_list<T: Serialize>(items: &[T]) -> io::Result<()> {
        Self::print_json(items)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_submit(result: &SubmitResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_study_card(card: &StudyCard) -> io::Result<()> {
        Self::print_json(card)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, event: crate::app::ProgressEvent) {
        tracing::debug!(message = %event.message, "progress");
    }
}
