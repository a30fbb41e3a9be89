use super::{CompletionReport, Controller};
use crate::error::Error;
use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Streams files to the host result server and reports completion to the
/// in-guest agent over XML-RPC.
#[derive(Debug, Clone)]
pub struct NetlogController {
    result_server: (String, u16),
    agent_address: String,
}

impl NetlogController {
    pub fn new(settings: &config::Controller) -> Self {
        Self {
            result_server: (settings.host_ip.clone(), settings.host_port),
            agent_address: settings.agent_address.clone(),
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// `complete(success, error, root)` as an XML-RPC method call.
pub(crate) fn completion_call(report: &CompletionReport) -> String {
    let error = match &report.error {
        Some(text) => format!("<string>{}</string>", escape(text)),
        None => "<nil/>".to_owned(),
    };
    format!(
        "<?xml version='1.0'?>\n<methodCall>\n<methodName>complete</methodName>\n<params>\n\
         <param><value><boolean>{}</boolean></value></param>\n\
         <param><value>{error}</value></param>\n\
         <param><value><string>{}</string></value></param>\n\
         </params>\n</methodCall>\n",
        u8::from(report.success),
        escape(&report.root.to_string_lossy()),
    )
}

/// Status code from the first line of an HTTP response.
fn status_code(response: &str) -> Option<u16> {
    response.lines().next()?.split_whitespace().nth(1)?.parse().ok()
}

#[async_trait]
impl Controller for NetlogController {
    async fn upload(&self, source: &Path, upload_path: &str) -> Result<(), Error> {
        let failed = |reason: String| Error::Upload {
            path: source.to_owned(),
            reason,
        };
        let (host, port) = &self.result_server;
        let mut stream = TcpStream::connect((host.as_str(), *port))
            .await
            .map_err(|err| failed(format!("connect to {host}:{port}: {err}")))?;
        let mut file = tokio::fs::File::open(source)
            .await
            .map_err(|err| failed(err.to_string()))?;

        stream
            .write_all(format!("FILE\n{upload_path}\n").as_bytes())
            .await
            .map_err(|err| failed(err.to_string()))?;
        let sent = tokio::io::copy(&mut file, &mut stream)
            .await
            .map_err(|err| failed(err.to_string()))?;
        stream.shutdown().await.map_err(|err| failed(err.to_string()))?;
        debug!(path = %source.display(), upload_path, bytes = sent, "file sent to result server");
        Ok(())
    }

    async fn complete(&self, report: &CompletionReport) -> Result<(), Error> {
        let body = completion_call(report);
        let request = format!(
            "POST /RPC2 HTTP/1.0\r\nHost: {}\r\nUser-Agent: analyzer-rs\r\n\
             Content-Type: text/xml\r\nContent-Length: {}\r\n\r\n{body}",
            self.agent_address,
            body.len(),
        );

        let mut stream = TcpStream::connect(self.agent_address.as_str())
            .await
            .map_err(|err| Error::Controller(format!("connect to {}: {err}", self.agent_address)))?;
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|err| Error::Controller(err.to_string()))?;
        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .await
            .map_err(|err| Error::Controller(err.to_string()))?;

        let response = String::from_utf8_lossy(&response);
        match status_code(&response) {
            Some(200) if !response.contains("<fault>") => Ok(()),
            Some(200) => Err(Error::Controller("agent returned a fault".into())),
            Some(code) => Err(Error::Controller(format!("agent answered HTTP {code}"))),
            None => Err(Error::Controller("malformed agent response".into())),
        }
    }
}
