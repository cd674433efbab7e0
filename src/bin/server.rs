//! SFT 서버 (수신자)
//!
//! 첫 송신자를 받아들이고 파일을 출력 디렉터리에 저장한다.
//! sentinel 시점에 크기와 CRC-32를 검사한다.
//!
//! 사용법:
//!   cargo run --release --bin sft-server -- [OPTIONS]
//!
//! 예시:
//!   # 받은 파일을 ./inbox 에 저장하고 한 번 받으면 종료
//!   cargo run --release --bin sft-server -- --output inbox --once

use std::path::PathBuf;
use std::str::FromStr;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sft::{Config, Driver, Error, Framing, ReliableConnection, Role, ShutdownHandle, StopReason};

fn value<T: FromStr>(args: &[String], i: usize, flag: &str) -> sft::Result<T> {
    args.get(i + 1)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::InvalidConfig(format!("{flag} 에 유효한 값 필요")))
}

fn print_help() {
    println!(
        r#"SFT Server - Steady-rate File Transfer 수신자

ack 계측 UDP 연결로 파일 하나를 받아 무결성을 검사합니다.

사용법:
  cargo run --release --bin sft-server -- [OPTIONS]

옵션:
  -p, --port <PORT>       수신 포트 (기본: 30000)
  -o, --output <DIR>      저장 디렉터리 (기본: .)
  --once                  전송 하나를 받으면 종료
  --untagged              태그 없는 기존 프레임 형식 사용
  --chunk-size <SIZE>     최대 청크 크기 바이트 (기본: 256)
  --timeout <SECS>        연결 타임아웃 초 (기본: 10)
  -h, --help              이 도움말 출력

예시:
  cargo run --release --bin sft-server -- --output inbox --once
  RUST_LOG=sft::telemetry=off cargo run --release --bin sft-server
"#
    );
}

fn parse_args() -> sft::Result<Config> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                config.server_port = value(&args, i, "--port")?;
                i += 1;
            }
            "--output" | "-o" => {
                config.output_dir = value::<PathBuf>(&args, i, "--output")?;
                i += 1;
            }
            "--once" => config.exit_after_transfer = true,
            "--untagged" => config.framing = Framing::Untagged,
            "--chunk-size" => {
                config.max_chunk_size = value(&args, i, "--chunk-size")?;
                i += 1;
            }
            "--timeout" => {
                config.timeout = value(&args, i, "--timeout")?;
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

    config.validate()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = parse_args()?;

    info!("SFT Server starting...");
    info!("Port: {}", config.server_port);
    info!("Output directory: {:?}", config.output_dir);
    info!("Framing: {:?}, chunk size: {} bytes", config.framing, config.max_chunk_size);

    let shutdown = ShutdownHandle::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            ctrl_c.request();
        }
    });

    let conn = ReliableConnection::from_config(&config);
    let mut driver = Driver::start(config, Role::Receiver, conn)?.with_shutdown(shutdown);
    let reason = driver.run().await?;

    println!("{}", driver.stats().summary());
    if let Some(report) = driver.last_transfer() {
        println!("Last transfer: {} -> {:?}", report.metadata, report.path);
    }

    if reason == StopReason::TransferReceived && driver.stats().integrity_failures > 0 {
        return Err("무결성 검사 실패".into());
    }
    Ok(())
}
