#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        Self::spawn_with_env(&[])
    }

    pub fn spawn_with_env(env: &[(&str, &str)]) -> Self {
        let exe = env!("CARGO_BIN_EXE_merittracd");
        let mut cmd = Command::new(exe);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .env_remove("MERITTRAC_WORKSPACE")
            .env_remove("MERITTRAC_AI_API_KEY")
            .env_remove("MERITTRAC_AI_BASE_URL")
            .env_remove("MERITTRAC_AI_MODEL")
            .env_remove("HTTP_PROXY")
            .env_remove("http_proxy")
            .env_remove("ALL_PROXY")
            .env_remove("all_proxy")
            .env("MERITTRAC_LOG", "warn");
        for (k, v) in env {
            cmd.env(k, v);
        }
        let mut child = cmd.spawn().expect("spawn merittracd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Returns the error code of a request expected to fail.
    pub fn request_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    }

    pub fn sign_in(&mut self, user_id: &str) {
        self.request_ok("session.begin", json!({ "userId": user_id }));
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn str_at<'a>(v: &'a serde_json::Value, key: &str) -> &'a str {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing string {key} in {v}"))
}

/// A workspace with one admin, one teacher, two students, two subjects and
/// two semesters. The teacher teaches Physics in Sem 1 and Chemistry in Sem 2.
pub struct Seed {
    pub workspace: PathBuf,
    pub admin: String,
    pub teacher: String,
    pub student_a: String,
    pub student_b: String,
    pub physics: String,
    pub chemistry: String,
    pub sem1: String,
    pub sem2: String,
}

pub fn seed(sc: &mut Sidecar, prefix: &str) -> Seed {
    let workspace = temp_dir(prefix);
    sc.request_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = sc.request_ok(
        "users.bootstrapAdmin",
        json!({ "email": "admin@merit.test", "name": "Ada Admin" }),
    );
    let admin = str_at(&admin, "userId").to_string();
    sc.sign_in(&admin);

    let mut user = |email: &str, name: &str, role: &str, prn: Option<&str>| {
        let mut params = json!({ "email": email, "name": name, "role": role });
        if let Some(p) = prn {
            params["prn"] = json!(p);
        }
        let r = sc.request_ok("users.create", params);
        str_at(&r, "userId").to_string()
    };
    let teacher = user("tara@merit.test", "Tara Teacher", "teacher", None);
    let student_a = user("asha@merit.test", "Asha Rao", "student", Some("PRN001"));
    let student_b = user("ben@merit.test", "Ben Okafor", "student", Some("PRN002"));

    let physics = sc.request_ok("subjects.create", json!({ "name": "Physics", "code": "PHY101" }));
    let physics = str_at(&physics, "subjectId").to_string();
    let chemistry = sc.request_ok("subjects.create", json!({ "name": "Chemistry", "code": "CHE101" }));
    let chemistry = str_at(&chemistry, "subjectId").to_string();

    let sem1 = sc.request_ok(
        "semesters.create",
        json!({ "name": "Semester 1", "year": 2025, "startDate": "2025-01-06", "endDate": "2025-05-30" }),
    );
    let sem1 = str_at(&sem1, "semesterId").to_string();
    let sem2 = sc.request_ok("semesters.create", json!({ "name": "Semester 2", "year": 2025 }));
    let sem2 = str_at(&sem2, "semesterId").to_string();

    for (subject, semester) in [(&physics, &sem1), (&chemistry, &sem2)] {
        sc.request_ok(
            "assignments.create",
            json!({ "teacherId": teacher, "subjectId": subject, "semesterId": semester }),
        );
    }

    Seed {
        workspace,
        admin,
        teacher,
        student_a,
        student_b,
        physics,
        chemistry,
        sem1,
        sem2,
    }
}
