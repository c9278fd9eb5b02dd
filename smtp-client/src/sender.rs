use std::sync::Arc;

use futures::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use smtp_message::{BodyType, Command, Email, EscapingDataWriter, Parameters, Reply};

use crate::{
    client::{Config, DynAsyncReadWrite, Extensions},
    transport::{read_for_reply, send_command, verify_reply, ExpectedReply, ReplyReader, TransportError},
};

const DATABUF_SIZE: usize = 16 * 1024;
const ZERO_DURATION: std::time::Duration = std::time::Duration::from_secs(0);

/// Extra `MAIL FROM` parameters a forwarding pass may need to propagate
/// unchanged to the next hop.
#[derive(Clone, Debug, Default)]
pub struct MailParams {
    pub body: Option<BodyType>,
    pub smtputf8: bool,
    pub auth: Option<String>,
}

impl MailParams {
    fn to_parameters(&self) -> Parameters {
        let mut params = Parameters::default();
        match self.body {
            Some(BodyType::EightBitMime) => params.push("BODY", Some("8BITMIME".to_owned())),
            Some(BodyType::BinaryMime) => params.push("BODY", Some("BINARYMIME".to_owned())),
            Some(BodyType::SevenBit) => params.push("BODY", Some("7BIT".to_owned())),
            Some(BodyType::Unknown) | None => {}
        }
        if self.smtputf8 {
            params.push("SMTPUTF8", None);
        }
        if let Some(auth) = &self.auth {
            params.push("AUTH", Some(auth.clone()));
        }
        params
    }
}

/// The fate of one `RCPT TO`, reported back to the caller so it can mutate
/// a stored message's recipient list accordingly.
#[derive(Debug)]
pub enum Outcome {
    Accepted,
    TransientlyRejected(Reply),
    PermanentlyRejected(Reply),
}

#[derive(Debug)]
pub struct RecipientOutcome {
    pub recipient: Email,
    pub outcome: Outcome,
}

fn classify(reply: Reply) -> Outcome {
    if reply.is_positive() {
        Outcome::Accepted
    } else if reply.is_transient() {
        Outcome::TransientlyRejected(reply)
    } else {
        Outcome::PermanentlyRejected(reply)
    }
}

pub struct Sender<Cfg> {
    pub(crate) io: DynAsyncReadWrite,
    pub(crate) reply: ReplyReader,
    pub(crate) extensions: Extensions,
    pub(crate) cfg: Arc<Cfg>,
}

impl<Cfg> Sender<Cfg>
where
    Cfg: Config,
{
    /// Sends one message to potentially multiple recipients in a single
    /// transaction (one `MAIL FROM`, one `RCPT TO` per recipient, one body).
    /// `mail` must be the message's raw, un-escaped content; dot-stuffing
    /// (for `DATA`) is applied here.
    ///
    /// Per-recipient outcomes are returned rather than an all-or-nothing
    /// `Result`: a rejected recipient does not abort delivery to the
    /// others. Only transport-level failures (connection
    /// drops, timeouts, malformed replies) short-circuit as `Err`.
    pub async fn send<Reader>(
        &mut self,
        from: Option<&Email>,
        to: &[Email],
        params: MailParams,
        mail: Reader,
    ) -> Result<Vec<RecipientOutcome>, TransportError>
    where
        Reader: AsyncRead + Unpin,
    {
        send_command(
            &mut self.io,
            Command::MailFrom { from: from.cloned(), params: params.to_parameters() },
            self.cfg.command_write_timeout(),
        )
        .await?;
        let reply = self.reply.read_reply(&mut self.io, self.cfg.mail_reply_timeout()).await?;
        verify_reply(reply, ExpectedReply::PositiveCompletion)?;

        let mut outcomes = Vec::with_capacity(to.len());
        for recipient in to {
            send_command(
                &mut self.io,
                Command::RcptTo { to: recipient.clone(), params: Parameters::default() },
                self.cfg.command_write_timeout(),
            )
            .await?;
            let reply = self.reply.read_reply(&mut self.io, self.cfg.rcpt_reply_timeout()).await?;
            outcomes.push(RecipientOutcome { recipient: recipient.clone(), outcome: classify(reply) });
        }

        if !outcomes.iter().any(|o| matches!(o.outcome, Outcome::Accepted)) {
            // Every recipient was rejected up front; no point opening DATA.
            return Ok(outcomes);
        }

        let final_reply = if self.extensions.contains(Extensions::CHUNKING) && self.cfg.prefer_chunking() {
            self.send_bdat(mail).await?
        } else {
            self.send_data(mail).await?
        };

        if !final_reply.is_positive() {
            let fallback = classify(final_reply);
            for outcome in &mut outcomes {
                if matches!(outcome.outcome, Outcome::Accepted) {
                    outcome.outcome = match &fallback {
                        Outcome::TransientlyRejected(r) => Outcome::TransientlyRejected(r.clone()),
                        Outcome::PermanentlyRejected(r) => Outcome::PermanentlyRejected(r.clone()),
                        Outcome::Accepted => unreachable!(),
                    };
                }
            }
        }

        Ok(outcomes)
    }

    async fn send_data<Reader>(&mut self, mail: Reader) -> Result<Reply, TransportError>
    where
        Reader: AsyncRead + Unpin,
    {
        send_command(&mut self.io, Command::Data, self.cfg.command_write_timeout()).await?;
        let reply = self.reply.read_reply(&mut self.io, self.cfg.data_init_reply_timeout()).await?;
        verify_reply(reply, ExpectedReply::PositiveIntermediate)?;

        futures::pin_mut!(mail);
        let cfg = self.cfg.clone();
        let mut databuf = [0u8; DATABUF_SIZE];
        {
            let mut writer = EscapingDataWriter::new(&mut self.io);
            loop {
                match mail.read(&mut databuf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        read_for_reply(
                            async {
                                writer.write(&databuf[..n]).await.map_err(TransportError::SendingData)
                            },
                            &chrono::Utc::now(),
                            cfg.data_block_write_timeout(),
                        )
                        .await?;
                    }
                    Err(e) => return Err(TransportError::ReadingMail(e)),
                }
            }
            writer.finish().await.map_err(TransportError::SendingData)?;
        }

        self.reply.read_reply(&mut self.io, self.cfg.data_end_reply_timeout()).await
    }

    async fn send_bdat<Reader>(&mut self, mail: Reader) -> Result<Reply, TransportError>
    where
        Reader: AsyncRead + Unpin,
    {
        futures::pin_mut!(mail);
        let mut databuf = [0u8; DATABUF_SIZE];
        let mut last_reply = None;
        loop {
            let n = mail.read(&mut databuf).await.map_err(TransportError::ReadingMail)?;
            if n == 0 {
                send_command(
                    &mut self.io,
                    Command::Bdat { chunk_size: 0, last: true },
                    self.cfg.command_write_timeout(),
                )
                .await?;
                last_reply = Some(self.reply.read_reply(&mut self.io, self.cfg.data_end_reply_timeout()).await?);
                break;
            }
            send_command(
                &mut self.io,
                Command::Bdat { chunk_size: n as u64, last: false },
                self.cfg.command_write_timeout(),
            )
            .await?;
            smol::future::or(
                async {
                    self.io.write_all(&databuf[..n]).await.map_err(TransportError::SendingData)
                },
                async {
                    smol::Timer::after(self.cfg.data_block_write_timeout().to_std().unwrap_or(ZERO_DURATION))
                        .await;
                    Err(TransportError::TimedOutSendingData)
                },
            )
            .await?;
            let reply = self.reply.read_reply(&mut self.io, self.cfg.data_end_reply_timeout()).await?;
            verify_reply(reply, ExpectedReply::PositiveCompletion)?;
        }

        Ok(last_reply.expect("loop only exits after setting last_reply"))
    }
}
