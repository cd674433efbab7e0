//! SFT 클라이언트 (송신자)
//!
//! 서버에 연결해서 파일 하나를 RTT 기반 권장 전송률로 보낸다.
//! 손실/변조 주입 옵션으로 무결성 검사를 시험할 수 있다.
//!
//! 사용법:
//!   cargo run --release --bin sft-client -- --file <PATH> [OPTIONS]
//!
//! 예시:
//!   # 5% 손실을 주입해서 전송
//!   cargo run --release --bin sft-client -- -f data.bin --drop-rate 0.05

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sft::{
    Config, Driver, Error, Framing, LossyConnection, ReliableConnection, Role, ShutdownHandle,
    StopReason, DEFAULT_SERVER_PORT,
};

/// 클라이언트 설정
struct ClientConfig {
    file_path: Option<PathBuf>,
    server_addr: SocketAddr,
    drop_rate: f64,
    corrupt_rate: f64,
    seed: Option<u64>,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_SERVER_PORT)),
            drop_rate: 0.0,
            corrupt_rate: 0.0,
            seed: None,
            config: Config::default(),
        }
    }
}

fn value<T: FromStr>(args: &[String], i: usize, flag: &str) -> sft::Result<T> {
    args.get(i + 1)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::InvalidConfig(format!("{flag} 에 유효한 값 필요")))
}

fn print_help() {
    println!(
        r#"SFT Client - Steady-rate File Transfer 송신자

RTT 히스테리시스 흐름 제어로 파일 하나를 보냅니다. 재전송은 하지 않습니다.

사용법:
  cargo run --release --bin sft-client -- --file <PATH> [OPTIONS]

옵션:
  -f, --file <PATH>        전송할 파일 경로 (필수)
  -s, --server <ADDR>      서버 주소 (기본: 127.0.0.1:30000)
  -p, --port <PORT>        로컬 포트 (기본: 30001)
  --untagged               태그 없는 기존 프레임 형식 사용
  --chunk-size <SIZE>      최대 청크 크기 바이트 (기본: 256)
  --burst <N>              전송 슬롯당 프레임 수 (기본: 1)
  --drop-rate <RATIO>      송신 패킷 손실 주입 0.0~1.0 (기본: 0)
  --corrupt-rate <RATIO>   송신 패킷 변조 주입 0.0~1.0 (기본: 0)
  --seed <N>               주입용 난수 시드
  -h, --help               이 도움말 출력

예시:
  cargo run --release --bin sft-client -- -f data.bin
  cargo run --release --bin sft-client -- -f data.bin --burst 4 --chunk-size 1200
  cargo run --release --bin sft-client -- -f data.bin --corrupt-rate 0.01 --seed 7
"#
    );
}

fn parse_args() -> sft::Result<ClientConfig> {
    let args: Vec<String> = std::env::args().collect();
    let mut client = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--file" | "-f" => {
                client.file_path = Some(value(&args, i, "--file")?);
                i += 1;
            }
            "--server" | "-s" => {
                client.server_addr = value(&args, i, "--server")?;
                i += 1;
            }
            "--port" | "-p" => {
                client.config.client_port = value(&args, i, "--port")?;
                i += 1;
            }
            "--untagged" => client.config.framing = Framing::Untagged,
            "--chunk-size" => {
                client.config.max_chunk_size = value(&args, i, "--chunk-size")?;
                i += 1;
            }
            "--burst" => {
                client.config.frames_per_slot = value(&args, i, "--burst")?;
                i += 1;
            }
            "--drop-rate" => {
                client.drop_rate = value(&args, i, "--drop-rate")?;
                i += 1;
            }
            "--corrupt-rate" => {
                client.corrupt_rate = value(&args, i, "--corrupt-rate")?;
                i += 1;
            }
            "--seed" => {
                client.seed = Some(value(&args, i, "--seed")?);
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => return Err(Error::InvalidConfig(format!("알 수 없는 옵션: {other}"))),
        }
        i += 1;
    }

    client.config = client.config.validate()?;
    Ok(client)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client = parse_args()?;
    let source = client
        .file_path
        .ok_or_else(|| Error::InvalidConfig("--file 이 필요함".into()))?;

    info!("SFT Client starting...");
    info!("Server address: {}", client.server_addr);
    info!("File: {:?}", source);
    info!(
        "Framing: {:?}, chunk size: {} bytes, burst: {}",
        client.config.framing, client.config.max_chunk_size, client.config.frames_per_slot
    );

    let seed = client.seed.unwrap_or_else(rand::random);
    if client.drop_rate > 0.0 || client.corrupt_rate > 0.0 {
        info!(
            "Injecting loss {:.1}%, corruption {:.1}% (seed {})",
            client.drop_rate * 100.0,
            client.corrupt_rate * 100.0,
            seed
        );
    }

    let shutdown = ShutdownHandle::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            ctrl_c.request();
        }
    });

    let conn = LossyConnection::new(
        ReliableConnection::from_config(&client.config),
        client.drop_rate,
        client.corrupt_rate,
        seed,
    )?;
    let role = Role::Sender {
        source,
        destination: client.server_addr,
    };
    let mut driver = Driver::start(client.config, role, conn)?.with_shutdown(shutdown);
    let reason = driver.run().await?;

    println!("{}", driver.stats().summary());
    println!(
        "Injected: {} dropped, {} corrupted",
        driver.connection().dropped(),
        driver.connection().corrupted()
    );
    if let Some(report) = driver.last_report() {
        println!("Last report: {}", report);
    }

    match reason {
        StopReason::ConnectFailed => Err(Error::ConnectFailed.into()),
        _ => Ok(()),
    }
}
