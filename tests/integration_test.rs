//! End-to-end tests driving an in-process server over real TCP sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use irori::ai::{BackendError, TextGenerator};
use irori::auth::{TokenStore, UserDirectory, tokens::DEFAULT_TOKEN_TTL_SECS};
use irori::common::time::SystemClock;
use irori::domain::{CredentialStore, RepositoryError, Role, Token, TokenRepository, User};
use irori::server::{AppState, serve};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Credential store seeded in memory; registration is not exercised here.
struct MemoryCredentialStore {
    seeded: Vec<User>,
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load_users(&self) -> Result<Vec<User>, RepositoryError> {
        Ok(self.seeded.clone())
    }

    async fn append_user(&self, _user: &User) -> Result<(), RepositoryError> {
        Ok(())
    }
}

/// Token repository that accepts writes and loads nothing; the in-process
/// token store keeps the live state.
struct MemoryTokenRepository;

#[async_trait]
impl TokenRepository for MemoryTokenRepository {
    async fn load_tokens(&self) -> Result<Vec<Token>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn append(&self, _token: &Token) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn rewrite_all(&self, _tokens: &[Token]) -> Result<(), RepositoryError> {
        Ok(())
    }
}

/// Backend double that records every prompt and answers with a fixed reply.
struct ScriptedGenerator {
    calls: StdMutex<Vec<String>>,
    reply: String,
}

impl ScriptedGenerator {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: StdMutex::new(Vec::new()),
            reply: reply.to_string(),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        self.calls.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

/// Start an in-process server on an ephemeral port.
async fn start_server(
    seeded_users: Vec<User>,
    token_ttl_secs: i64,
    generator: Arc<dyn TextGenerator>,
) -> (SocketAddr, Arc<AppState>) {
    let users = UserDirectory::new(Arc::new(MemoryCredentialStore {
        seeded: seeded_users,
    }));
    users.load().await.unwrap();
    let tokens = TokenStore::new(
        Arc::new(MemoryTokenRepository),
        Arc::new(SystemClock),
        token_ttl_secs,
    );
    let state = Arc::new(AppState::new(users, tokens, generator));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, state.clone()));
    (addr, state)
}

fn admin(username: &str) -> User {
    User::new(username.to_string(), "pw".to_string(), Role::Admin)
}

fn plain_user(username: &str) -> User {
    User::new(username.to_string(), "pw".to_string(), Role::User)
}

/// One scripted client connection.
struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl TestClient {
    /// Connect and perform the two-line handshake.
    async fn connect(addr: SocketAddr, username: &str, token: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let mut client = Self {
            lines: BufReader::new(read_half).lines(),
            write: write_half,
        };
        client.send(username).await;
        client.send(token).await;
        client
    }

    async fn send(&mut self, line: &str) {
        self.write.write_all(line.as_bytes()).await.unwrap();
        self.write.write_all(b"\n").await.unwrap();
    }

    /// Receive one line or panic after a timeout.
    async fn recv(&mut self) -> String {
        timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .expect("read failed")
            .expect("connection closed unexpectedly")
    }

    /// Skip lines until one contains `needle`, returning it.
    async fn recv_until(&mut self, needle: &str) -> String {
        loop {
            let line = self.recv().await;
            if line.contains(needle) {
                return line;
            }
        }
    }

    /// Expect the server to close the connection.
    async fn expect_eof(&mut self) {
        let line = timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for EOF")
            .expect("read failed");
        assert_eq!(line, None, "expected EOF, got {:?}", line);
    }

    /// Assert that nothing arrives within a short window.
    async fn expect_silence(&mut self) {
        let result = timeout(Duration::from_millis(300), self.lines.next_line()).await;
        assert!(
            result.is_err(),
            "expected no traffic, got {:?}",
            result.unwrap()
        );
    }
}

/// Wait for the server-side session count to settle at `expected`.
async fn wait_for_sessions(state: &Arc<AppState>, expected: usize) {
    for _ in 0..200 {
        if state.sessions.count().await == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "session count never reached {expected} (now {})",
        state.sessions.count().await
    );
}

#[tokio::test]
async fn test_first_login_receives_token_and_banner() {
    // テスト項目: 空トークンの新規接続に TOKEN 行と歓迎バナーが届く
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(vec![], DEFAULT_TOKEN_TTL_SECS, generator).await;

    // when (操作):
    let mut alice = TestClient::connect(addr, "alice", "").await;

    // then (期待する結果):
    let token_line = alice.recv().await;
    assert!(token_line.starts_with("TOKEN:"), "got {token_line:?}");
    assert_eq!(alice.recv().await, "Welcome to the server, alice!");
    alice.recv_until("You joined the room: general").await;
}

#[tokio::test]
async fn test_ai_room_end_to_end() {
    // テスト項目: AI ルームの作成・参加・1 メッセージで 1 回のバックエンド呼び出しになる
    // given (前提条件):
    let generator = ScriptedGenerator::new("pong");
    let (addr, _state) =
        start_server(vec![], DEFAULT_TOKEN_TTL_SECS, generator.clone()).await;
    let mut alice = TestClient::connect(addr, "alice", "").await;
    alice.recv_until("You joined the room: general").await;

    // when (操作):
    alice.send("/create ai:help:You are a helper").await;
    assert_eq!(
        alice.recv().await,
        "AI chat room 'help' created with prompt: You are a helper"
    );
    alice.send("/join help").await;
    assert_eq!(alice.recv().await, "You joined the room: help");
    alice.send("ping").await;

    // then (期待する結果): ボットの返信が 1 回のバックエンド呼び出しで届く
    assert_eq!(alice.recv().await, "Bot: pong");
    assert_eq!(generator.calls(), vec!["You are a helper\nping".to_string()]);
}

#[tokio::test]
async fn test_reconnection_returns_to_last_room() {
    // テスト項目: 有効なトークンでの再接続は最後にいたルームへ戻り、バナーは出ない
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, state) = start_server(vec![], DEFAULT_TOKEN_TTL_SECS, generator).await;

    let mut alice = TestClient::connect(addr, "alice", "").await;
    let token_line = alice.recv().await;
    let secret = token_line.strip_prefix("TOKEN:").unwrap().to_string();
    alice.recv_until("You joined the room: general").await;
    alice.send("/create lounge").await;
    assert_eq!(alice.recv().await, "Room 'lounge' created.");
    alice.send("/join lounge").await;
    assert_eq!(alice.recv().await, "You joined the room: lounge");
    drop(alice);
    wait_for_sessions(&state, 0).await;

    let mut bob = TestClient::connect(addr, "bob", "").await;
    bob.recv_until("You joined the room: general").await;
    bob.send("/join lounge").await;
    assert_eq!(bob.recv().await, "You joined the room: lounge");

    // when (操作):
    let mut alice = TestClient::connect(addr, "alice", &secret).await;

    // then (期待する結果): TOKEN 行も歓迎バナーもなく、直接 lounge に入る
    assert_eq!(alice.recv().await, "You joined the room: lounge");
    assert_eq!(bob.recv().await, "alice has reconnected.");
}

#[tokio::test]
async fn test_expired_token_is_rejected_and_connection_closed() {
    // テスト項目: 期限切れトークンでの再接続は通知とともに切断される
    // given (前提条件): TTL が負のサーバーでは発行直後からトークンが期限切れ
    let generator = ScriptedGenerator::new("ok");
    let (addr, state) = start_server(vec![], -1, generator).await;

    let mut alice = TestClient::connect(addr, "alice", "").await;
    let token_line = alice.recv().await;
    let secret = token_line.strip_prefix("TOKEN:").unwrap().to_string();
    alice.recv_until("You joined the room: general").await;
    drop(alice);
    wait_for_sessions(&state, 0).await;

    // when (操作):
    let mut alice = TestClient::connect(addr, "alice", &secret).await;

    // then (期待する結果):
    assert_eq!(
        alice.recv().await,
        "Your session has expired. Please login again."
    );
    alice.expect_eof().await;
}

#[tokio::test]
async fn test_unknown_token_is_rejected() {
    // テスト項目: トークン未発行ユーザーの偽トークンは拒否される
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(vec![], DEFAULT_TOKEN_TTL_SECS, generator).await;

    // when (操作):
    let mut ghost = TestClient::connect(addr, "ghost", "bogus-secret").await;

    // then (期待する結果):
    assert_eq!(
        ghost.recv().await,
        "Your session has expired. Please login again."
    );
    ghost.expect_eof().await;
}

#[tokio::test]
async fn test_duplicate_username_is_rejected() {
    // テスト項目: 接続中のユーザー名での二重ログインは拒否される
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(vec![], DEFAULT_TOKEN_TTL_SECS, generator).await;
    let mut alice = TestClient::connect(addr, "alice", "").await;
    alice.recv_until("You joined the room: general").await;

    // when (操作):
    let mut imposter = TestClient::connect(addr, "alice", "").await;

    // then (期待する結果):
    assert_eq!(imposter.recv().await, "user 'alice' is already connected");
    imposter.expect_eof().await;
}

#[tokio::test]
async fn test_mute_blocks_chat_until_unmute() {
    // テスト項目: ミュート中のチャットは配信されず、解除後は再び届く
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(
        vec![admin("root"), plain_user("alice")],
        DEFAULT_TOKEN_TTL_SECS,
        generator,
    )
    .await;
    let mut root = TestClient::connect(addr, "root", "").await;
    root.recv_until("You joined the room: general").await;
    let mut alice = TestClient::connect(addr, "alice", "").await;
    alice.recv_until("You joined the room: general").await;
    root.recv_until("alice has joined the room.").await;

    // when (操作):
    root.send("/mute alice").await;
    assert_eq!(root.recv().await, "User 'alice' has been muted.");
    assert_eq!(alice.recv().await, "You have been muted by an admin.");
    alice.send("hello?").await;

    // then (期待する結果): 送信者にのみ拒否通知が出て、ルームには何も届かない
    assert_eq!(alice.recv().await, "You are muted and cannot send messages.");
    root.expect_silence().await;

    // 解除後は次の行から配信が戻る
    root.send("/unmute alice").await;
    assert_eq!(root.recv().await, "User 'alice' has been unmuted.");
    assert_eq!(alice.recv().await, "You have been unmuted by an admin.");
    alice.send("back again").await;
    assert_eq!(root.recv().await, "alice: back again");
}

#[tokio::test]
async fn test_admin_commands_denied_for_plain_users() {
    // テスト項目: 非管理者の管理コマンドは拒否され、状態は変わらない
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(
        vec![admin("root"), plain_user("alice")],
        DEFAULT_TOKEN_TTL_SECS,
        generator,
    )
    .await;
    let mut root = TestClient::connect(addr, "root", "").await;
    root.recv_until("You joined the room: general").await;
    let mut alice = TestClient::connect(addr, "alice", "").await;
    alice.recv_until("You joined the room: general").await;
    root.recv_until("alice has joined the room.").await;

    // when (操作):
    alice.send("/ban root").await;

    // then (期待する結果):
    assert_eq!(
        alice.recv().await,
        "Permission denied: admin privileges required."
    );
    root.expect_silence().await;
}

#[tokio::test]
async fn test_ban_sends_notice_and_closes_connection() {
    // テスト項目: ban された接続は BANNED: 通知の後に閉じられる
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, state) = start_server(
        vec![admin("root"), plain_user("alice")],
        DEFAULT_TOKEN_TTL_SECS,
        generator,
    )
    .await;
    let mut root = TestClient::connect(addr, "root", "").await;
    root.recv_until("You joined the room: general").await;
    let mut alice = TestClient::connect(addr, "alice", "").await;
    alice.recv_until("You joined the room: general").await;
    root.recv_until("alice has joined the room.").await;

    // when (操作):
    root.send("/ban alice").await;

    // then (期待する結果):
    assert_eq!(root.recv().await, "User 'alice' has been banned.");
    assert_eq!(alice.recv().await, "BANNED:");
    alice.expect_eof().await;
    wait_for_sessions(&state, 1).await;
    assert_eq!(root.recv().await, "alice has left the room.");
}

#[tokio::test]
async fn test_kick_moves_target_back_to_general() {
    // テスト項目: kick された利用者は general に戻される
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(
        vec![admin("root"), plain_user("alice")],
        DEFAULT_TOKEN_TTL_SECS,
        generator,
    )
    .await;
    let mut root = TestClient::connect(addr, "root", "").await;
    root.recv_until("You joined the room: general").await;
    let mut alice = TestClient::connect(addr, "alice", "").await;
    alice.recv_until("You joined the room: general").await;
    root.recv_until("alice has joined the room.").await;

    alice.send("/create side").await;
    assert_eq!(alice.recv().await, "Room 'side' created.");
    alice.send("/join side").await;
    assert_eq!(alice.recv().await, "You joined the room: side");
    root.recv_until("alice has left the room.").await;

    // when (操作):
    root.send("/kick alice").await;

    // then (期待する結果):
    assert_eq!(root.recv().await, "User 'alice' kicked to 'general'.");
    assert_eq!(
        alice.recv().await,
        "You have been kicked back to 'general'."
    );
    assert_eq!(alice.recv().await, "You joined the room: general");

    // kick 後のチャットは general に流れる
    alice.send("back in general").await;
    assert_eq!(root.recv().await, "alice: back in general");
}

#[tokio::test]
async fn test_kick_from_general_is_rejected() {
    // テスト項目: general にいる利用者は kick できない
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(
        vec![admin("root"), plain_user("alice")],
        DEFAULT_TOKEN_TTL_SECS,
        generator,
    )
    .await;
    let mut root = TestClient::connect(addr, "root", "").await;
    root.recv_until("You joined the room: general").await;
    let mut alice = TestClient::connect(addr, "alice", "").await;
    alice.recv_until("You joined the room: general").await;
    root.recv_until("alice has joined the room.").await;

    // when (操作):
    root.send("/kick alice").await;

    // then (期待する結果):
    assert_eq!(root.recv().await, "Cannot kick 'alice' out of 'general'.");
    alice.expect_silence().await;
}

#[tokio::test]
async fn test_announce_reaches_every_room() {
    // テスト項目: /announce は全ルームの全員に届く
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(
        vec![admin("root"), plain_user("alice")],
        DEFAULT_TOKEN_TTL_SECS,
        generator,
    )
    .await;
    let mut root = TestClient::connect(addr, "root", "").await;
    root.recv_until("You joined the room: general").await;
    let mut alice = TestClient::connect(addr, "alice", "").await;
    alice.recv_until("You joined the room: general").await;
    root.recv_until("alice has joined the room.").await;

    alice.send("/create side").await;
    assert_eq!(alice.recv().await, "Room 'side' created.");
    alice.send("/join side").await;
    assert_eq!(alice.recv().await, "You joined the room: side");
    root.recv_until("alice has left the room.").await;

    // when (操作):
    root.send("/announce maintenance at noon").await;

    // then (期待する結果): 別ルームの alice にも発信者の root にも届く
    assert_eq!(alice.recv().await, "[Announcement] maintenance at noon");
    assert_eq!(root.recv().await, "[Announcement] maintenance at noon");
    assert_eq!(root.recv().await, "Announcement sent.");
}

#[tokio::test]
async fn test_promote_notifies_target_and_rejects_repeat() {
    // テスト項目: /promote は対象に ROLE_UPDATE を届け、同じロールへの再昇格は拒否される
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(
        vec![admin("root"), plain_user("alice")],
        DEFAULT_TOKEN_TTL_SECS,
        generator,
    )
    .await;
    let mut root = TestClient::connect(addr, "root", "").await;
    root.recv_until("You joined the room: general").await;
    let mut alice = TestClient::connect(addr, "alice", "").await;
    alice.recv_until("You joined the room: general").await;
    root.recv_until("alice has joined the room.").await;

    // when (操作):
    root.send("/promote alice").await;

    // then (期待する結果):
    assert_eq!(root.recv().await, "User 'alice' is now admin.");
    assert_eq!(alice.recv().await, "ROLE_UPDATE:admin");

    // 昇格済みのユーザーへの再昇格はエラー応答になり、通知は飛ばない
    root.send("/promote alice").await;
    assert_eq!(root.recv().await, "User 'alice' is already admin.");
    alice.expect_silence().await;

    // 昇格後は管理コマンドが通る
    alice.send("/demote root").await;
    assert_eq!(alice.recv().await, "User 'root' is now user.");
    assert_eq!(root.recv().await, "ROLE_UPDATE:user");
}

#[tokio::test]
async fn test_stats_reports_rooms_and_muted_users() {
    // テスト項目: /stats が接続数・ルーム別人数・ミュート一覧を報告する
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(
        vec![admin("root"), plain_user("alice")],
        DEFAULT_TOKEN_TTL_SECS,
        generator,
    )
    .await;
    let mut root = TestClient::connect(addr, "root", "").await;
    root.recv_until("You joined the room: general").await;
    let mut alice = TestClient::connect(addr, "alice", "").await;
    alice.recv_until("You joined the room: general").await;
    root.recv_until("alice has joined the room.").await;

    root.send("/mute alice").await;
    assert_eq!(root.recv().await, "User 'alice' has been muted.");
    assert_eq!(alice.recv().await, "You have been muted by an admin.");
    alice.send("/create side").await;
    assert_eq!(alice.recv().await, "Room 'side' created.");
    alice.send("/join side").await;
    assert_eq!(alice.recv().await, "You joined the room: side");
    root.recv_until("alice has left the room.").await;

    // when (操作):
    root.send("/stats").await;

    // then (期待する結果): ルームは名前順、ミュート中のユーザーが列挙される
    assert_eq!(root.recv().await, "Connected users: 2");
    assert_eq!(root.recv().await, "Rooms:");
    assert_eq!(root.recv().await, "  general: 1 member(s)");
    assert_eq!(root.recv().await, "  side: 1 member(s)");
    assert_eq!(root.recv().await, "Muted users: alice");
}

#[tokio::test]
async fn test_join_current_room_does_not_renotify_members() {
    // テスト項目: いま居るルームへの /join は応答のみで、他メンバーに参加通知は流れない
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(
        vec![admin("root"), plain_user("alice")],
        DEFAULT_TOKEN_TTL_SECS,
        generator,
    )
    .await;
    let mut root = TestClient::connect(addr, "root", "").await;
    root.recv_until("You joined the room: general").await;
    let mut alice = TestClient::connect(addr, "alice", "").await;
    alice.recv_until("You joined the room: general").await;
    root.recv_until("alice has joined the room.").await;

    // when (操作):
    alice.send("/join general").await;

    // then (期待する結果):
    assert_eq!(alice.recv().await, "You are already in 'general'.");
    root.expect_silence().await;
}

#[tokio::test]
async fn test_username_with_comma_is_rejected() {
    // テスト項目: カンマを含むユーザー名は握手の時点で拒否される
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(vec![], DEFAULT_TOKEN_TTL_SECS, generator).await;

    // when (操作):
    let mut client = TestClient::connect(addr, "al,ice", "").await;

    // then (期待する結果):
    assert_eq!(
        client.recv().await,
        "Username must not contain ',' or control characters."
    );
    client.expect_eof().await;
}

#[tokio::test]
async fn test_join_to_missing_room_is_strict() {
    // テスト項目: 存在しないルームへの /join は失敗し、元のルームに留まる
    // given (前提条件):
    let generator = ScriptedGenerator::new("ok");
    let (addr, _state) = start_server(vec![], DEFAULT_TOKEN_TTL_SECS, generator).await;
    let mut alice = TestClient::connect(addr, "alice", "").await;
    alice.recv_until("You joined the room: general").await;

    // when (操作):
    alice.send("/join nowhere").await;
    assert_eq!(alice.recv().await, "Room 'nowhere' does not exist.");

    // then (期待する結果): まだ general にいる
    alice.send("/status").await;
    assert_eq!(
        alice.recv().await,
        "You are 'alice' (user) in room 'general'."
    );
}
