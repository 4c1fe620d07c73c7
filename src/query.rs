use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::time::timeout;

use crate::error::SourceQueryError;
use crate::info::ServerInfo;
use crate::packet::{
    is_the_ship, Challenge, Frame, PacketType, RequestPacket, ResponsePacket, SplitAssembler,
};
use crate::parse::Parsed;
use crate::players::PlayersInfo;
use crate::rules::RulesInfo;
use crate::transport::{ClientConfig, TransportClient, TransportProtocol};

/// Outcome of one query. Never an `Err`: every failure ends up in
/// [QueryResult::Failure] with a readable message.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult<T> {
    Success {
        data: T,
        latency: Duration,
    },
    /// The mandatory part decoded fine but an optional trailing section did not.
    Partial {
        data: T,
        latency: Duration,
        message: String,
    },
    Failure {
        message: String,
    },
}

impl<T> QueryResult<T> {
    fn from_parsed(parsed: Parsed<T>, latency: Duration) -> Self {
        match parsed.incomplete {
            None => QueryResult::Success {
                data: parsed.value,
                latency,
            },
            Some(message) => QueryResult::Partial {
                data: parsed.value,
                latency,
                message,
            },
        }
    }

    fn failure(err: SourceQueryError) -> Self {
        QueryResult::Failure {
            message: err.to_string(),
        }
    }

    /// `true` for both full and partial success.
    pub fn succeeded(&self) -> bool {
        !matches!(self, QueryResult::Failure { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            QueryResult::Success { data, .. } | QueryResult::Partial { data, .. } => Some(data),
            QueryResult::Failure { .. } => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            QueryResult::Success { data, .. } | QueryResult::Partial { data, .. } => Some(data),
            QueryResult::Failure { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            QueryResult::Success { .. } => None,
            QueryResult::Partial { message, .. } | QueryResult::Failure { message } => Some(message),
        }
    }

    /// Round trip of the request that produced the data.
    pub fn latency(&self) -> Option<Duration> {
        match self {
            QueryResult::Success { latency, .. } | QueryResult::Partial { latency, .. } => {
                Some(*latency)
            }
            QueryResult::Failure { .. } => None,
        }
    }
}

/// Runs A2S queries over one [TransportClient].
#[derive(Debug)]
pub struct SourceQuery {
    transport: TransportClient,
    app_id: Option<u16>,
}

impl SourceQuery {
    pub fn new(transport: TransportClient) -> Self {
        SourceQuery {
            transport,
            app_id: None,
        }
    }

    /// Open a fresh transport to `host:port` and wrap it.
    pub async fn connect(
        host: &str,
        port: u16,
        protocol: TransportProtocol,
        config: ClientConfig,
    ) -> Result<Self, SourceQueryError> {
        let mut transport = TransportClient::new(config);
        transport.connect(host, port, protocol).await?;
        Ok(SourceQuery::new(transport))
    }

    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut TransportClient {
        &mut self.transport
    }

    /// App id used to decide whether player responses carry "The Ship" totals.
    /// Set automatically by a successful [SourceQuery::info].
    pub fn app_id(&self) -> Option<u16> {
        self.app_id
    }

    pub fn set_app_id(&mut self, app_id: u16) {
        self.app_id = Some(app_id);
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    /// A2S_INFO. Answers a challenge if the server sends one.
    pub async fn info(&mut self) -> QueryResult<ServerInfo> {
        let result = self
            .run(PacketType::InfoRequest, PacketType::InfoResponse, ServerInfo::parse)
            .await;
        if let Some(info) = result.data() {
            self.app_id = Some(info.app_id);
        }
        result
    }

    /// A2S_PLAYER, with the challenge exchange.
    pub async fn players(&mut self) -> QueryResult<PlayersInfo> {
        let the_ship = self.app_id.map_or(false, is_the_ship);
        self.run(
            PacketType::PlayerRequest,
            PacketType::PlayerResponse,
            |body| PlayersInfo::parse(body, the_ship),
        )
        .await
    }

    /// A2S_RULES, with the challenge exchange.
    pub async fn rules(&mut self) -> QueryResult<RulesInfo> {
        self.run(PacketType::RulesRequest, PacketType::RulesResponse, RulesInfo::parse)
            .await
    }

    /// A2S_SERVERQUERY_GETCHALLENGE. Most current servers ignore it and
    /// the caller will see a receive timeout.
    pub async fn request_challenge(&mut self) -> Result<Challenge, SourceQueryError> {
        if !self.transport.is_connected() {
            return Err(SourceQueryError::NotConnected);
        }
        let request = RequestPacket::new(PacketType::ChallengeRequest, None);
        self.transport.send(&request.pack()).await?;
        let packet = self.receive_reply(PacketType::Challenge).await?;
        packet.challenge()
    }

    async fn run<T, F>(&mut self, request: PacketType, expected: PacketType, parse: F) -> QueryResult<T>
    where
        F: FnOnce(&[u8]) -> Result<Parsed<T>, SourceQueryError>,
    {
        if !self.transport.is_connected() {
            return QueryResult::failure(SourceQueryError::NotConnected);
        }
        match self.try_run(request, expected, parse).await {
            Ok(result) => result,
            Err(e) => {
                debug!("{request:?} failed: {e}");
                QueryResult::failure(e)
            }
        }
    }

    async fn try_run<T, F>(
        &mut self,
        request: PacketType,
        expected: PacketType,
        parse: F,
    ) -> Result<QueryResult<T>, SourceQueryError>
    where
        F: FnOnce(&[u8]) -> Result<Parsed<T>, SourceQueryError>,
    {
        let (packet, latency) = self.exchange(request, expected).await?;
        let parsed = parse(packet.body())?;
        Ok(QueryResult::from_parsed(parsed, latency))
    }

    /// Send `request` until the server answers with `expected`, echoing
    /// every challenge it hands out. Latency covers the final round trip.
    async fn exchange(
        &mut self,
        request: PacketType,
        expected: PacketType,
    ) -> Result<(ResponsePacket, Duration), SourceQueryError> {
        let attempts = self.transport.config().max_challenge_attempts();
        let mut challenge: Option<Challenge> = None;

        for _ in 0..=attempts {
            let packet = RequestPacket::new(request, challenge);
            let started = Instant::now();
            self.transport.send(&packet.pack()).await?;
            let response = self.receive_reply(expected).await?;
            let latency = started.elapsed();

            if response.packet_type() == PacketType::Challenge {
                let token = response.challenge()?;
                debug!("{request:?} challenged with {token:02x?}");
                challenge = Some(token);
                continue;
            }
            return Ok((response, latency));
        }

        Err(SourceQueryError::ChallengeLoop(attempts))
    }

    /// Receive until a challenge or an `expected` response shows up.
    ///
    /// Replies of any other type (late answers to an earlier, timed out
    /// query) are dropped while the receive timeout has time left. If only
    /// such replies arrive, the query fails with the type of the last one.
    async fn receive_reply(
        &mut self,
        expected: PacketType,
    ) -> Result<ResponsePacket, SourceQueryError> {
        let limit = self.transport.config().recv_timeout;
        let deadline = Instant::now() + limit;
        let mut stale: Option<PacketType> = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let received = timeout(remaining, self.receive_packet())
                .await
                .unwrap_or(Err(SourceQueryError::Timeout("receive", limit.as_millis())));

            let response = match (received, stale) {
                (Ok(response), _) => response,
                (Err(SourceQueryError::Timeout(..)), Some(got)) => {
                    return Err(SourceQueryError::UnexpectedResponse {
                        expected: expected.to_byte(),
                        got: got.to_byte(),
                    })
                }
                (Err(e), _) => return Err(e),
            };

            let kind = response.packet_type();
            if kind == PacketType::Challenge || kind == expected {
                return Ok(response);
            }
            warn!("dropping {kind:?} reply while waiting for {expected:?}");
            stale = Some(kind);
        }
    }

    /// Receive one logical response, reassembling split packets.
    async fn receive_packet(&mut self) -> Result<ResponsePacket, SourceQueryError> {
        let first = match Frame::unpack(&self.transport.receive().await?)? {
            Frame::Single(packet) => return Ok(packet),
            Frame::Split(split) => split,
        };
        debug!(
            "response {} is split into {} packet(s)",
            first.id, first.total
        );

        let mut assembler = SplitAssembler::new(&first)?;
        let mut pending = assembler.push(first)?;
        while pending.is_none() {
            match Frame::unpack(&self.transport.receive().await?)? {
                Frame::Split(split) => pending = assembler.push(split)?,
                Frame::Single(packet) => {
                    warn!("single {:?} packet arrived mid split response", packet.packet_type());
                    return Err(SourceQueryError::InvalidSplitPacket(
                        "single packet arrived before all fragments".to_owned(),
                    ));
                }
            }
        }

        let payload = pending.unwrap_or_default();
        match Frame::unpack(&payload)? {
            Frame::Single(packet) => Ok(packet),
            Frame::Split(_) => Err(SourceQueryError::InvalidSplitPacket(
                "reassembled payload is itself split".to_owned(),
            )),
        }
    }
}

/// Query `host:port` over UDP with A2S_INFO.
///
/// If `timeout_dur` is `Some(Duration)`, it bounds the connect, every send and every receive.
/// The default is 3 seconds each.
///
/// Example usage:
/// ```no_run
/// # async fn run() {
/// let info = rsourcequery::query::query("127.0.0.1", 27015, None).await;
/// if let Some(info) = info.data() {
///     println!("{} on {}", info.name, info.map);
/// }
/// # }
/// ```
pub async fn query(host: &str, port: u16, timeout_dur: Option<Duration>) -> QueryResult<ServerInfo> {
    let mut config = ClientConfig::default();
    if let Some(dur) = timeout_dur {
        config = config.with_send_timeout(dur).with_recv_timeout(dur);
    }
    match SourceQuery::connect(host, port, TransportProtocol::Udp, config).await {
        Ok(mut client) => client.info().await,
        Err(e) => QueryResult::failure(e),
    }
}
