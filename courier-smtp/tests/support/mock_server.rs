//! Scripted SMTP relay for exercising the client end to end.
//!
//! The server speaks plaintext only, accepts one username/password pair over
//! `AUTH PLAIN` or `AUTH LOGIN`, and records every command it sees.
//!
//! ```rust,ignore
//! let server = MockSmtpServer::builder()
//!     .with_credentials("sender@example.com", "secret")
//!     .with_rcpt_to_response(550, "No such user")
//!     .build()
//!     .await;
//!
//! // connect to server.addr() ...
//! ```
#![allow(dead_code)]

use std::{fmt::Write, net::SocketAddr, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
    task::JoinHandle,
    time::timeout,
};

/// A command observed by the mock relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Auth { mechanism: String, accepted: bool },
    MailFrom(String),
    RcptTo(String),
    Data,
    MessageContent(String),
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct Config {
    greeting: Reply,
    capabilities: Vec<String>,
    username: String,
    password: String,
    rcpt_to: Reply,
    data_end: Reply,
    response_delay: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.relay ESMTP ready"),
            capabilities: vec![
                "mock.relay".to_string(),
                "AUTH LOGIN PLAIN".to_string(),
                "8BITMIME".to_string(),
            ],
            username: "sender@example.com".to_string(),
            password: "secret".to_string(),
            rcpt_to: Reply::new(250, "OK"),
            data_end: Reply::new(250, "OK: queued"),
            response_delay: None,
        }
    }
}

/// A running mock relay. Stops accepting when dropped.
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<SmtpCommand>>>,
    handle: JoinHandle<()>,
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockSmtpServer {
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: Config::default(),
        }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.lock().await.clone()
    }

    /// The bodies of every message accepted so far.
    pub async fn messages(&self) -> Vec<String> {
        self.commands
            .lock()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(content) => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<Config>,
        commands: Arc<Mutex<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(&config.greeting.to_bytes()).await?;

        loop {
            line.clear();
            match timeout(Duration::from_secs(10), reader.read_line(&mut line)).await {
                Ok(Ok(0)) | Err(_) => return Ok(()),
                Ok(result) => {
                    result?;
                }
            }

            let command_line = line.trim_end().to_string();
            let (verb, argument) = command_line
                .split_once(' ')
                .unwrap_or((command_line.as_str(), ""));

            if let Some(delay) = config.response_delay {
                tokio::time::sleep(delay).await;
            }

            let (reply, command) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => {
                    let mut reply = String::new();
                    let last = config.capabilities.len() - 1;
                    for (i, capability) in config.capabilities.iter().enumerate() {
                        let separator = if i == last { ' ' } else { '-' };
                        let _ = write!(reply, "250{separator}{capability}\r\n");
                    }
                    (reply.into_bytes(), SmtpCommand::Ehlo(argument.to_string()))
                }
                "AUTH" => {
                    let (mechanism, initial) =
                        argument.split_once(' ').unwrap_or((argument, ""));
                    let mechanism = mechanism.to_ascii_uppercase();

                    let accepted = match mechanism.as_str() {
                        "PLAIN" => {
                            let decoded = STANDARD.decode(initial).unwrap_or_default();
                            let expected =
                                format!("\0{}\0{}", config.username, config.password);
                            decoded == expected.as_bytes()
                        }
                        "LOGIN" => {
                            writer.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                            let username = read_decoded(&mut reader).await?;
                            writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
                            let password = read_decoded(&mut reader).await?;
                            username == config.username && password == config.password
                        }
                        _ => false,
                    };

                    let reply = if accepted {
                        Reply::new(235, "2.7.0 Accepted")
                    } else {
                        Reply::new(535, "5.7.8 Username and Password not accepted")
                    };
                    (reply.to_bytes(), SmtpCommand::Auth { mechanism, accepted })
                }
                "MAIL" => (
                    Reply::new(250, "OK").to_bytes(),
                    SmtpCommand::MailFrom(argument.to_string()),
                ),
                "RCPT" => (
                    config.rcpt_to.to_bytes(),
                    SmtpCommand::RcptTo(argument.to_string()),
                ),
                "DATA" => {
                    commands.lock().await.push(SmtpCommand::Data);
                    writer
                        .write_all(&Reply::new(354, "End data with <CR><LF>.<CR><LF>").to_bytes())
                        .await?;

                    let mut content = String::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await? == 0 {
                            return Ok(());
                        }
                        if line.trim_end() == "." {
                            break;
                        }
                        content.push_str(&line);
                    }

                    commands
                        .lock()
                        .await
                        .push(SmtpCommand::MessageContent(content));
                    writer.write_all(&config.data_end.to_bytes()).await?;
                    continue;
                }
                "QUIT" => {
                    commands.lock().await.push(SmtpCommand::Quit);
                    writer.write_all(&Reply::new(221, "Bye").to_bytes()).await?;
                    return Ok(());
                }
                _ => (
                    Reply::new(502, "Command not implemented").to_bytes(),
                    SmtpCommand::Other(command_line.clone()),
                ),
            };

            commands.lock().await.push(command);
            writer.write_all(&reply).await?;
        }
    }
}

async fn read_decoded<R>(reader: &mut BufReader<R>) -> std::io::Result<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let decoded = STANDARD.decode(line.trim_end()).unwrap_or_default();
    Ok(String::from_utf8_lossy(&decoded).into_owned())
}

pub struct MockSmtpServerBuilder {
    config: Config,
}

impl MockSmtpServerBuilder {
    /// The only username/password pair the relay accepts.
    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.config.username = username.to_string();
        self.config.password = password.to_string();
        self
    }

    /// EHLO keywords, after the greeting line.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.config.capabilities = std::iter::once("mock.relay")
            .chain(capabilities.iter().copied())
            .map(ToString::to_string)
            .collect();
        self
    }

    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: &str) -> Self {
        self.config.greeting = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: &str) -> Self {
        self.config.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: &str) -> Self {
        self.config.data_end = Reply::new(code, message);
        self
    }

    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.config.response_delay = Some(delay);
        self
    }

    pub async fn build(self) -> MockSmtpServer {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock relay");
        let addr = listener.local_addr().expect("mock relay address");
        let config = Arc::new(self.config);
        let commands = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let commands = commands.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let config = config.clone();
                    let commands = commands.clone();
                    tokio::spawn(async move {
                        let _ = MockSmtpServer::handle_client(stream, config, commands).await;
                    });
                }
            })
        };

        MockSmtpServer {
            addr,
            commands,
            handle,
        }
    }
}
