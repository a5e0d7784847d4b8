mod common;

use common::{seed, Sidecar};
use serde_json::json;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;

/// Serves exactly one HTTP request with `body` and reports the request line
/// and request body it saw.
fn one_shot_server(status: u16, body: String) -> (String, mpsc::Receiver<(String, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
        let mut request_line = String::new();
        reader.read_line(&mut request_line).expect("request line");

        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).expect("header");
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut req_body = vec![0u8; content_length];
        reader.read_exact(&mut req_body).expect("request body");

        let mut stream = stream;
        let reason = if status == 200 { "OK" } else { "Error" };
        write!(
            stream,
            "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
        .expect("write response");
        stream.flush().expect("flush response");

        let _ = tx.send((
            request_line.trim_end().to_string(),
            String::from_utf8_lossy(&req_body).to_string(),
        ));
    });

    (format!("http://{addr}/v1beta"), rx)
}

fn gemini_body(text: &str) -> String {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
    .to_string()
}

fn enter_marks(sc: &mut Sidecar, s: &common::Seed) {
    sc.request_ok(
        "marks.upsert",
        json!({ "rows": [
            { "studentId": s.student_a, "subjectId": s.physics, "semesterId": s.sem1,
              "ca1": 8, "ca2": 7, "midTerm": 15, "endTerm": 44 }
        ]}),
    );
}

#[test]
fn analysis_round_trips_through_the_service() {
    let analysis = json!({
        "overallPerformance": "Solid first semester.",
        "strengths": "Continuous assessment in Physics.",
        "weaknesses": "End-term exam.",
        "recommendations": "Practice past papers."
    });
    let fenced = format!("```json\n{}\n```", analysis);
    let (base_url, seen) = one_shot_server(200, gemini_body(&fenced));

    let mut sc = Sidecar::spawn_with_env(&[
        ("MERITTRAC_AI_API_KEY", "test-key"),
        ("MERITTRAC_AI_BASE_URL", base_url.as_str()),
        ("MERITTRAC_AI_MODEL", "test-model"),
    ]);
    let s = seed(&mut sc, "merittrac-analysis");
    enter_marks(&mut sc, &s);

    sc.sign_in(&s.student_a);
    let result = sc.request_ok("analysis.generate", json!({}));
    assert_eq!(result["studentId"].as_str(), Some(s.student_a.as_str()));
    assert_eq!(result["analysis"], analysis);
    assert!(result["generatedAt"].as_str().is_some());

    let (request_line, request_body) = seen.recv().expect("stub saw a request");
    assert!(request_line.starts_with("POST /v1beta/models/test-model:generateContent?key=test-key"));
    assert!(request_body.contains("Asha Rao"));
    assert!(request_body.contains("Physics"));

    let _ = std::fs::remove_dir_all(s.workspace);
}

#[test]
fn service_errors_surface_as_codes() {
    let (base_url, _seen) = one_shot_server(500, "{\"error\":\"boom\"}".to_string());
    let mut sc = Sidecar::spawn_with_env(&[
        ("MERITTRAC_AI_API_KEY", "test-key"),
        ("MERITTRAC_AI_BASE_URL", base_url.as_str()),
    ]);
    let s = seed(&mut sc, "merittrac-analysis-500");
    enter_marks(&mut sc, &s);

    sc.sign_in(&s.student_a);
    assert_eq!(
        sc.request_err("analysis.generate", json!({})),
        "ai_request_failed"
    );

    let _ = std::fs::remove_dir_all(s.workspace);
}

#[test]
fn analysis_needs_a_key_and_marks() {
    let mut sc = Sidecar::spawn();
    let s = seed(&mut sc, "merittrac-analysis-unconfigured");

    sc.sign_in(&s.student_a);
    assert_eq!(sc.request_err("analysis.generate", json!({})), "bad_params");

    sc.sign_in(&s.admin);
    enter_marks(&mut sc, &s);
    sc.sign_in(&s.student_a);
    assert_eq!(
        sc.request_err("analysis.generate", json!({})),
        "ai_not_configured"
    );

    let _ = std::fs::remove_dir_all(s.workspace);
}
