use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

use rsourcequery::info::{Environment, ServerType};
use rsourcequery::packet::{
    edf, CHALLENGE_QUERY, INFO_QUERY, PLAYER_QUERY_CHALLENGE, RULE_QUERY_CHALLENGE,
};
use rsourcequery::{ClientConfig, QueryResult, SourceQuery, SourceQueryError, TransportProtocol};

const CHALLENGE: [u8; 4] = [0xAA, 0xBB, 0xCC, 0xDD];

fn config() -> ClientConfig {
    ClientConfig::default()
        .with_send_timeout(Duration::from_millis(1000))
        .with_recv_timeout(Duration::from_millis(1000))
}

fn single(kind: u8, body: &[u8]) -> Vec<u8> {
    let mut packet = vec![0xFF, 0xFF, 0xFF, 0xFF, kind];
    packet.extend_from_slice(body);
    packet
}

fn challenge_reply() -> Vec<u8> {
    single(0x41, &CHALLENGE)
}

fn cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn info_body(app_id: u16) -> Vec<u8> {
    let mut body = vec![17];
    cstr(&mut body, "Test Server");
    cstr(&mut body, "de_dust2");
    cstr(&mut body, "cstrike");
    cstr(&mut body, "Counter-Strike");
    body.extend_from_slice(&app_id.to_le_bytes());
    body.extend_from_slice(&[5, 16, 0, b'd', b'l', 0, 1]);
    if app_id == 2400 {
        body.extend_from_slice(&[0, 3, 10]);
    }
    cstr(&mut body, "1.0.0.0");
    body
}

fn rules_body(rules: &[(&str, &str)]) -> Vec<u8> {
    let mut body = (rules.len() as u16).to_le_bytes().to_vec();
    for (name, value) in rules {
        cstr(&mut body, name);
        cstr(&mut body, value);
    }
    body
}

fn players_body() -> Vec<u8> {
    let mut body = vec![1, 0];
    cstr(&mut body, "alice");
    body.extend_from_slice(&25i32.to_le_bytes());
    body.extend_from_slice(&60.0f32.to_le_bytes());
    body
}

fn split(id: i32, total: u8, number: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = (-2i32).to_le_bytes().to_vec();
    packet.extend_from_slice(&id.to_le_bytes());
    packet.push(total);
    packet.push(number);
    packet.extend_from_slice(&1248u16.to_le_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// Loopback UDP server: for each request it receives, send the matching
/// replies. Resolves to the raw requests it saw.
async fn fake_server(script: Vec<Vec<Vec<u8>>>) -> (SocketAddr, JoinHandle<Vec<Vec<u8>>>) {
    let script = script.into_iter().map(|replies| (Duration::ZERO, replies)).collect();
    slow_server(script).await
}

/// Like [fake_server], but waits the given delay before answering each request.
async fn slow_server(
    script: Vec<(Duration, Vec<Vec<u8>>)>,
) -> (SocketAddr, JoinHandle<Vec<Vec<u8>>>) {
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = sock.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        let mut buf = [0u8; 2048];
        for (delay, replies) in script {
            let (n, from) = sock.recv_from(&mut buf).await.unwrap();
            seen.push(buf[..n].to_vec());
            tokio::time::sleep(delay).await;
            for reply in replies {
                sock.send_to(&reply, from).await.unwrap();
            }
        }
        seen
    });
    (addr, handle)
}

async fn client_for(addr: SocketAddr) -> SourceQuery {
    SourceQuery::connect("127.0.0.1", addr.port(), TransportProtocol::Udp, config())
        .await
        .unwrap()
}

#[tokio::test]
async fn info_happy_path() {
    let (addr, server) = fake_server(vec![vec![single(0x49, &info_body(10))]]).await;
    let mut client = client_for(addr).await;

    let result = client.info().await;
    let QueryResult::Success { data, .. } = &result else {
        panic!("expected success, got {result:?}");
    };
    assert_eq!(data.server_type, ServerType::Dedicated);
    assert_eq!(data.environment, Environment::Linux);
    assert_eq!(data.players, 5);
    assert!(data.vac_enabled);
    assert!(result.latency().is_some());
    assert_eq!(client.app_id(), Some(10));

    let seen = server.await.unwrap();
    assert_eq!(seen, vec![INFO_QUERY.to_vec()]);
}

#[tokio::test]
async fn info_answers_challenge() {
    let (addr, server) = fake_server(vec![
        vec![challenge_reply()],
        vec![single(0x49, &info_body(10))],
    ])
    .await;
    let mut client = client_for(addr).await;

    assert!(client.info().await.succeeded());

    let seen = server.await.unwrap();
    let mut expected = INFO_QUERY.to_vec();
    expected.extend_from_slice(&CHALLENGE);
    assert_eq!(seen[1], expected);
}

#[tokio::test]
async fn rules_challenge_exchange() {
    let rules = rules_body(&[("mp_timelimit", "30"), ("sv_cheats", "0")]);
    let (addr, server) =
        fake_server(vec![vec![challenge_reply()], vec![single(0x45, &rules)]]).await;
    let mut client = client_for(addr).await;

    let result = client.rules().await;
    let data = result.data().expect("rules");
    assert_eq!(data.count, 2);
    assert_eq!(data.rules.len(), 2);
    assert_eq!(data.get("sv_cheats"), Some("0"));

    let seen = server.await.unwrap();
    assert_eq!(seen[0], RULE_QUERY_CHALLENGE);
    assert_eq!(seen[1], [0xFF, 0xFF, 0xFF, 0xFF, 0x56, 0xAA, 0xBB, 0xCC, 0xDD]);
}

#[tokio::test]
async fn players_without_challenge_are_accepted() {
    let (addr, server) = fake_server(vec![vec![single(0x44, &players_body())]]).await;
    let mut client = client_for(addr).await;

    let result = client.players().await;
    let data = result.data().expect("players");
    assert_eq!(data.players[0].name, "alice");
    assert_eq!(data.players[0].score, 25);
    assert_eq!(data.players[0].duration, Duration::from_secs(60));

    assert_eq!(server.await.unwrap(), vec![PLAYER_QUERY_CHALLENGE.to_vec()]);
}

#[tokio::test]
async fn the_ship_players_carry_totals() {
    let mut players = players_body();
    players.extend_from_slice(&4u64.to_le_bytes());
    players.extend_from_slice(&900u64.to_le_bytes());
    let (addr, _server) = fake_server(vec![
        vec![single(0x49, &info_body(2400))],
        vec![challenge_reply()],
        vec![single(0x44, &players)],
    ])
    .await;
    let mut client = client_for(addr).await;

    let info = client.info().await.into_data().expect("info");
    assert!(info.the_ship.is_some());

    let players = client.players().await.into_data().expect("players");
    let totals = players.the_ship.expect("ship totals");
    assert_eq!(totals.deaths, 4);
    assert_eq!(totals.money, 900);
}

#[tokio::test]
async fn split_rules_are_reassembled() {
    let payload = single(0x45, &rules_body(&[("a", "1"), ("b", "2"), ("c", "3")]));
    let (head, tail) = payload.split_at(payload.len() / 2);
    let (addr, _server) = fake_server(vec![
        vec![challenge_reply()],
        vec![split(42, 2, 1, tail), split(42, 2, 0, head)],
    ])
    .await;
    let mut client = client_for(addr).await;

    let rules = client.rules().await.into_data().expect("rules");
    assert_eq!(rules.count, 3);
    assert_eq!(rules.get("c"), Some("3"));
}

#[tokio::test]
async fn compressed_split_fails() {
    let (addr, _server) =
        fake_server(vec![vec![split(i32::MIN | 1, 2, 0, b"BZh")]]).await;
    let mut client = client_for(addr).await;

    let result = client.rules().await;
    assert!(!result.succeeded());
    assert!(result.message().unwrap().contains("compressed"));
}

#[tokio::test]
async fn partial_extended_block_is_soft_success() {
    let mut body = info_body(10);
    body.push(edf::PORT | edf::STEAM_ID);
    let (addr, _server) = fake_server(vec![vec![single(0x49, &body)]]).await;
    let mut client = client_for(addr).await;

    let result = client.info().await;
    let QueryResult::Partial { data, message, .. } = &result else {
        panic!("expected partial success, got {result:?}");
    };
    assert!(result.succeeded());
    assert_eq!(data.name, "Test Server");
    assert!(message.contains("extended data"));
}

#[tokio::test]
async fn truncated_info_is_failure() {
    let body = info_body(10);
    let (addr, _server) =
        fake_server(vec![vec![single(0x49, &body[..body.len() - 4])]]).await;
    let mut client = client_for(addr).await;

    let result = client.info().await;
    assert!(!result.succeeded());
    assert!(result.data().is_none());
    assert!(result.message().unwrap().contains("truncated"));
}

#[tokio::test]
async fn endless_challenges_give_up() {
    let attempts = 2;
    let script = vec![vec![challenge_reply()]; attempts + 1];
    let (addr, server) = fake_server(script).await;
    let mut client = SourceQuery::connect(
        "127.0.0.1",
        addr.port(),
        TransportProtocol::Udp,
        config().with_max_challenge_attempts(attempts),
    )
    .await
    .unwrap();

    let result = client.players().await;
    assert!(!result.succeeded());
    assert!(result.message().unwrap().contains("challenge"));
    assert_eq!(server.await.unwrap().len(), attempts + 1);
}

#[tokio::test]
async fn wrong_response_type_fails() {
    let (addr, _server) =
        fake_server(vec![vec![challenge_reply()], vec![single(0x44, &players_body())]]).await;
    let mut client = client_for(addr).await;

    let result = client.rules().await;
    assert!(!result.succeeded());
    assert!(result.message().unwrap().contains("unexpected response type"));
}

#[tokio::test]
async fn silent_server_times_out() {
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut client = SourceQuery::connect(
        "127.0.0.1",
        sock.local_addr().unwrap().port(),
        TransportProtocol::Udp,
        config().with_recv_timeout(Duration::from_millis(100)),
    )
    .await
    .unwrap();

    let result = client.info().await;
    assert!(!result.succeeded());
    assert!(result.message().unwrap().contains("timed out"));
}

#[tokio::test]
async fn info_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        stream.read(&mut buf).await.unwrap();
        stream
            .write_all(&single(0x49, &info_body(10)))
            .await
            .unwrap();
    });

    let mut client = SourceQuery::connect("127.0.0.1", addr.port(), TransportProtocol::Tcp, config())
        .await
        .unwrap();
    let info = client.info().await.into_data().expect("info");
    assert_eq!(info.map, "de_dust2");
    assert_eq!(info.version, "1.0.0.0");
}

#[tokio::test]
async fn closed_client_reports_not_connected() {
    let (addr, _server) = fake_server(vec![]).await;
    let mut client = client_for(addr).await;
    client.close();
    client.close();

    let result = client.info().await;
    assert_eq!(result.message(), Some("not connected to a server"));
}

#[tokio::test]
async fn late_reply_to_timed_out_query_is_dropped() {
    let rules = rules_body(&[("sv_cheats", "0")]);
    let (addr, server) = slow_server(vec![
        (Duration::from_millis(400), vec![single(0x49, &info_body(10))]),
        (Duration::ZERO, vec![challenge_reply()]),
        (Duration::ZERO, vec![single(0x45, &rules)]),
    ])
    .await;
    let mut client = SourceQuery::connect(
        "127.0.0.1",
        addr.port(),
        TransportProtocol::Udp,
        config().with_recv_timeout(Duration::from_millis(300)),
    )
    .await
    .unwrap();

    let info = client.info().await;
    assert!(info.message().unwrap().contains("timed out"));

    // the info reply lands while the rules query is waiting
    let result = client.rules().await;
    let data = result.data().expect("rules after a late info reply");
    assert_eq!(data.get("sv_cheats"), Some("0"));

    let seen = server.await.unwrap();
    assert_eq!(seen[1], RULE_QUERY_CHALLENGE);
}

#[tokio::test]
async fn generic_challenge_request() {
    let (addr, server) = fake_server(vec![vec![challenge_reply()]]).await;
    let mut client = client_for(addr).await;

    assert_eq!(client.request_challenge().await.unwrap(), CHALLENGE);
    assert_eq!(server.await.unwrap(), vec![CHALLENGE_QUERY.to_vec()]);
}

#[tokio::test]
async fn generic_challenge_request_rejects_other_replies() {
    let (addr, _server) = fake_server(vec![vec![single(0x49, &info_body(10))]]).await;
    let mut client = SourceQuery::connect(
        "127.0.0.1",
        addr.port(),
        TransportProtocol::Udp,
        config().with_recv_timeout(Duration::from_millis(200)),
    )
    .await
    .unwrap();

    match client.request_challenge().await {
        Err(SourceQueryError::UnexpectedResponse { expected, got }) => {
            assert_eq!(expected, 0x41);
            assert_eq!(got, 0x49);
        }
        other => panic!("expected an unexpected response error, got {other:?}"),
    }
}
