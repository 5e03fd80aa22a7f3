use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::*;
use fuel_consumption_server::{
    parser::FieldLayout,
    server::TelemetryServer,
    sink::{CsvResultSink, MemoryResultSink, ResultSink, SessionResult},
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
};

async fn start_server(
    sink: Arc<dyn ResultSink>,
    layout: FieldLayout,
    inactivity_timeout: Option<Duration>,
) -> Result<(SocketAddr, Arc<TelemetryServer>)> {
    let server = Arc::new(
        TelemetryServer::builder("127.0.0.1:0", sink)
            .layout(layout)
            .inactivity_timeout(inactivity_timeout)
            .build(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let local_addr = listener.local_addr()?;

    tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });

    Ok((local_addr, server))
}

async fn send_lines(address: SocketAddr, lines: &[&str]) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(address).await?;
    for line in lines {
        stream.write_all(format!("{line}\n").as_bytes()).await?;
    }
    stream.flush().await?;
    Ok(stream)
}

async fn wait_for_results(sink: &MemoryResultSink, expected: usize) -> Vec<SessionResult> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let results = sink.results().await;
        if results.len() >= expected || tokio::time::Instant::now() > deadline {
            return results;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sentinel_session() -> Result<()> {
    let sink = Arc::new(MemoryResultSink::new());
    let (address, _server) = start_server(sink.clone(), FieldLayout::PLAIN, None).await?;

    let _stream = send_lines(
        address,
        &[
            "Plane123",
            "FUEL TOTAL QUANTITY,TIME",
            "12_3_2023 14:00:00,100",
            "12_3_2023 14:01:00,95",
            "12_3_2023 14:02:00,90",
            "EOF",
        ],
    )
    .await?;

    let results = wait_for_results(&sink, 1).await;
    assert_eq!(results, vec![SessionResult::new("Plane123", 5.0)]);
    assert_eq!(results[0].to_record(), "Plane123,5.0000\n");

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disconnect_without_sentinel_records_once() -> Result<()> {
    let sink = Arc::new(MemoryResultSink::new());
    let (address, server) = start_server(sink.clone(), FieldLayout::PREFIXED, None).await?;

    let stream = send_lines(
        address,
        &[
            "Plane456",
            "Plane456,12_3_2023 14:00:00,50,1234",
            "Plane456,12_3_2023 14:04:00,42,1234",
        ],
    )
    .await?;
    drop(stream);

    let results = wait_for_results(&sink, 1).await;
    assert_eq!(results, vec![SessionResult::new("Plane456", 2.0)]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.results().await.len(), 1);
    assert!(server.registry().identifiers().await?.is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_inactive_session_is_finalized_once() -> Result<()> {
    let sink = Arc::new(MemoryResultSink::new());
    let (address, server) = start_server(
        sink.clone(),
        FieldLayout::PLAIN,
        Some(Duration::from_millis(300)),
    )
    .await?;

    let stream = send_lines(
        address,
        &[
            "Plane789",
            "12_3_2023 14:00:00,30",
            "12_3_2023 14:10:00,25",
        ],
    )
    .await?;

    let results = wait_for_results(&sink, 1).await;
    assert_eq!(results, vec![SessionResult::new("Plane789", 0.5)]);

    // Closing the already finalized connection must not produce a second record
    drop(stream);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.results().await.len(), 1);
    assert_eq!(server.active_sessions(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconnect_starts_fresh() -> Result<()> {
    let sink = Arc::new(MemoryResultSink::new());
    let (address, _server) = start_server(sink.clone(), FieldLayout::PLAIN, None).await?;

    let _first = send_lines(
        address,
        &[
            "Plane1",
            "1_1_2024 10:00:00,100",
            "1_1_2024 10:01:00,95",
            "EOF",
        ],
    )
    .await?;
    wait_for_results(&sink, 1).await;

    // Would add 45 to the consumption if the previous baseline survived
    let _second = send_lines(
        address,
        &[
            "Plane1",
            "1_1_2024 11:00:00,50",
            "1_1_2024 11:01:00,48",
            "EOF",
        ],
    )
    .await?;

    let results = wait_for_results(&sink, 2).await;
    assert_eq!(
        results,
        vec![
            SessionResult::new("Plane1", 5.0),
            SessionResult::new("Plane1", 2.0)
        ]
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_sessions() -> Result<()> {
    const SESSIONS: usize = 32;

    let dir = tempfile::tempdir()?;
    let results_path = dir.path().join("Results.csv");
    let sink = Arc::new(CsvResultSink::new(results_path.clone()));
    let (address, server) = start_server(sink, FieldLayout::PREFIXED, None).await?;

    let clients = (0..SESSIONS)
        .map(|index| {
            tokio::spawn(async move {
                let identifier = format!("Plane{index:03}");
                let quantity = 1000.0;
                let lines = (0..10)
                    .map(|minute| {
                        format!(
                            "{identifier},1_1_2024 10:{minute:02}:00,{},0",
                            quantity - (minute * (index + 1)) as f64
                        )
                    })
                    .collect::<Vec<String>>();

                let mut all = vec![identifier.clone()];
                all.extend(lines);
                all.push("EOF".to_string());

                let all = all.iter().map(String::as_str).collect::<Vec<&str>>();
                send_lines(address, &all).await
            })
        })
        .collect::<Vec<_>>();

    let mut streams = Vec::new();
    for client in clients {
        streams.push(client.await??);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let content = loop {
        let content = tokio::fs::read_to_string(&results_path)
            .await
            .unwrap_or_default();
        if content.lines().count() >= SESSIONS || tokio::time::Instant::now() > deadline {
            break content;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let mut lines = content.lines().collect::<Vec<&str>>();
    lines.sort();
    assert_eq!(lines.len(), SESSIONS);
    for (index, line) in lines.iter().enumerate() {
        assert_eq!(*line, format!("Plane{index:03},{:.4}", (index + 1) as f64));
    }

    assert!(server.registry().identifiers().await?.is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bad_records_do_not_end_session() -> Result<()> {
    let sink = Arc::new(MemoryResultSink::new());
    let (address, _server) = start_server(sink.clone(), FieldLayout::PLAIN, None).await?;

    let _stream = send_lines(
        address,
        &[
            "Plane42",
            "1_1_2024 10:00:00,80",
            "garbage",
            "FUEL TOTAL QUANTITY,TIME",
            "1_1_2024 10:02:00,not-a-number",
            "1_1_2024 10:02:00,76",
            "EOF",
        ],
    )
    .await?;

    let results = wait_for_results(&sink, 1).await;
    assert_eq!(results, vec![SessionResult::new("Plane42", 2.0)]);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_undecodable_bytes_do_not_end_session() -> Result<()> {
    let sink = Arc::new(MemoryResultSink::new());
    let (address, server) = start_server(sink.clone(), FieldLayout::PLAIN, None).await?;

    let mut stream = TcpStream::connect(address).await?;
    stream.write_all(b"Plane1\r\n").await?;
    stream.write_all(b"1_1_2024 10:00:00,100\r\n").await?;
    stream.write_all(b"1_1_2024 10:00:30,99\xB0\r\n").await?;
    stream.write_all(&[b'7'; 70 * 1024]).await?;
    stream.write_all(b"\n1_1_2024 10:01:00,95\n").await?;
    stream.write_all(b"1_1_2024 10:02:00,90\nEOF\n").await?;
    stream.flush().await?;

    let results = wait_for_results(&sink, 1).await;
    assert_eq!(results, vec![SessionResult::new("Plane1", 5.0)]);
    assert!(server.registry().identifiers().await?.is_empty());

    Ok(())
}
