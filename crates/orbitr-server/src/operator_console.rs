//! Operator console for a running Orbitr server.
//!
//! An interactive TUI showing open incidents, pending workflows and the live
//! insight stream, with slash commands for approvals and the simulator.
//! Anything typed without a leading `/` goes to the assistant.
//!
//! Launch with `orbitr console --url http://127.0.0.1:8000`.

use std::io::{self, Stdout};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame, Terminal,
};
use serde_json::Value;

use crate::client::ApiClient;
use crate::feed::{spawn_feed, ws_url, RealtimeFeed};

const MAX_MESSAGES: usize = 500;
const REFRESH_EVERY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
struct IncidentView {
    id: String,
    title: String,
    severity: String,
    status: String,
    findings: u64,
}

#[derive(Debug, Clone, PartialEq)]
struct WorkflowView {
    workflow_id: String,
    workflow_type: String,
    status: String,
    current_step: u64,
    total_steps: usize,
}

/// Server-side data pulled on each refresh.
#[derive(Debug, Clone, Default)]
struct ServerSnapshot {
    health: Option<Value>,
    incidents: Vec<IncidentView>,
    workflows: Vec<WorkflowView>,
    error: Option<String>,
}

fn incident_views(body: &Value) -> Vec<IncidentView> {
    body["incidents"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|i| IncidentView {
                    id: i["id"].as_str().unwrap_or("-").to_string(),
                    title: i["title"].as_str().unwrap_or("-").to_string(),
                    severity: i["severity"].as_str().unwrap_or("-").to_string(),
                    status: i["status"].as_str().unwrap_or("-").to_string(),
                    findings: i["findings"].as_u64().unwrap_or(0),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn workflow_views(body: &Value) -> Vec<WorkflowView> {
    body["workflows"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|w| WorkflowView {
                    workflow_id: w["workflow_id"].as_str().unwrap_or("-").to_string(),
                    workflow_type: w["workflow_type"].as_str().unwrap_or("-").to_string(),
                    status: w["status"].as_str().unwrap_or("-").to_string(),
                    current_step: w["current_step"].as_u64().unwrap_or(0),
                    total_steps: w["steps"].as_array().map_or(0, Vec::len),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn severity_color(severity: &str) -> Color {
    match severity.to_ascii_lowercase().as_str() {
        "critical" => Color::Red,
        "high" => Color::LightRed,
        "medium" => Color::Yellow,
        "low" => Color::Green,
        _ => Color::White,
    }
}

fn workflow_status_color(status: &str) -> Color {
    match status {
        "pending" => Color::Yellow,
        "in_progress" => Color::Blue,
        "awaiting_approval" => Color::Magenta,
        "approved" | "completed" => Color::Green,
        "rejected" | "escalated" | "expired" => Color::Red,
        _ => Color::White,
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

struct OperatorConsole {
    client: ApiClient,
    feed: Arc<Mutex<RealtimeFeed>>,
    server: ServerSnapshot,
    input: String,
    cursor_pos: usize,
    history: Vec<String>,
    history_pos: Option<usize>,
    console_messages: Vec<(chrono::DateTime<chrono::Utc>, String, Color)>,
}

impl OperatorConsole {
    fn new(client: ApiClient, feed: Arc<Mutex<RealtimeFeed>>) -> Self {
        let mut console = Self {
            client,
            feed,
            server: ServerSnapshot::default(),
            input: String::new(),
            cursor_pos: 0,
            history: Vec::new(),
            history_pos: None,
            console_messages: Vec::new(),
        };
        console.add_message("Orbitr Operator Console ready. Type a question or /help.", Color::Cyan);
        console.add_message(
            "Commands: /status, /incidents, /workflows, /approve, /reject, /sim, /scenario, /demo, /quit",
            Color::DarkGray,
        );
        console
    }

    async fn refresh(&mut self) {
        let mut snapshot = ServerSnapshot::default();
        match self.client.health().await {
            Ok(health) => snapshot.health = Some(health),
            Err(e) => snapshot.error = Some(e.to_string()),
        }
        if snapshot.error.is_none() {
            if let Ok(body) = self.client.incidents(20).await {
                snapshot.incidents = incident_views(&body);
            }
            if let Ok(body) = self.client.workflows(None).await {
                snapshot.workflows = workflow_views(&body);
            }
        }
        self.server = snapshot;
    }

    async fn process_input(&mut self) {
        let input = self.input.trim().to_string();
        if input.is_empty() {
            return;
        }
        self.history.push(input.clone());
        self.history_pos = None;

        if input.starts_with('/') {
            self.process_command(&input).await;
        } else {
            self.ask(&input).await;
        }

        self.input.clear();
        self.cursor_pos = 0;
    }

    async fn process_command(&mut self, cmd: &str) {
        let mut parts = cmd.split_whitespace();
        let command = parts.next().unwrap_or("");
        let arg = parts.next();
        let rest: Vec<&str> = parts.collect();

        match command {
            "/help" => {
                self.add_message("Available commands:", Color::Cyan);
                for line in [
                    "  <text>                 - Ask the assistant",
                    "  /status                - Server health and queue",
                    "  /incidents             - List open incidents",
                    "  /workflows [status]    - List workflows",
                    "  /approve <id>          - Approve a workflow",
                    "  /reject <id> [reason]  - Reject a workflow",
                    "  /reset <id>            - Restart a workflow from its first step",
                    "  /sim start|stop|status - Control the simulator",
                    "  /scenario [name]       - List or run a scripted scenario",
                    "  /demo                  - Seed quick-demo data",
                    "  /quit                  - Exit the console",
                ] {
                    self.add_message(line, Color::White);
                }
            }
            "/status" => match self.client.health().await {
                Ok(health) => {
                    self.add_message(
                        &format!(
                            "Status: {} | Database: {} | LLM: {}",
                            health["status"].as_str().unwrap_or("?"),
                            health["database"].as_str().unwrap_or("?"),
                            if health["llm_enabled"].as_bool().unwrap_or(false) { "on" } else { "off" },
                        ),
                        Color::Green,
                    );
                    self.add_message(
                        &format!(
                            "Queue: {} | Pending workflows: {} | Clients: {} | Uptime: {}s",
                            health["queue_size"],
                            health["pending_workflows"],
                            health["realtime_clients"],
                            health["uptime_seconds"],
                        ),
                        Color::Green,
                    );
                }
                Err(e) => self.add_message(&format!("Health check failed: {e}"), Color::Red),
            },
            "/incidents" => {
                self.refresh().await;
                let incidents = self.server.incidents.clone();
                if incidents.is_empty() {
                    self.add_message("No open incidents.", Color::Yellow);
                } else {
                    self.add_message(&format!("Incidents ({}):", incidents.len()), Color::Cyan);
                    for i in &incidents {
                        self.add_message(
                            &format!("  {} [{}] {} - {} findings={}", i.id, i.severity, i.title, i.status, i.findings),
                            severity_color(&i.severity),
                        );
                    }
                }
            }
            "/workflows" => match self.client.workflows(arg).await {
                Ok(body) => {
                    let workflows = workflow_views(&body);
                    if workflows.is_empty() {
                        self.add_message("No workflows.", Color::Yellow);
                    }
                    for w in &workflows {
                        self.add_message(
                            &format!(
                                "  {} {} [{}] step {}/{}",
                                w.workflow_id, w.workflow_type, w.status, w.current_step, w.total_steps
                            ),
                            workflow_status_color(&w.status),
                        );
                    }
                }
                Err(e) => self.add_message(&format!("Could not list workflows: {e}"), Color::Red),
            },
            "/approve" | "/reject" | "/reset" => {
                let Some(id) = arg else {
                    self.add_message(&format!("Usage: {command} <workflow_id>"), Color::Yellow);
                    return;
                };
                let reason = (!rest.is_empty()).then(|| rest.join(" "));
                let result = match command {
                    "/approve" => self.client.approve(id, "operator").await,
                    "/reject" => self.client.reject(id, reason.as_deref()).await,
                    _ => self.client.reset_workflow(id).await,
                };
                match result {
                    Ok(body) => self.add_message(
                        &format!("Workflow {id} is now {}", body["workflow"]["status"].as_str().unwrap_or("?")),
                        Color::Green,
                    ),
                    Err(e) => self.add_message(&format!("{command} failed: {e}"), Color::Red),
                }
            }
            "/sim" => {
                let result = match arg {
                    Some("start") => self.client.simulation_start().await,
                    Some("stop") => self.client.simulation_stop().await,
                    Some("status") | None => self.client.simulation_status().await,
                    Some(other) => {
                        self.add_message(&format!("Unknown simulation action: {other}"), Color::Yellow);
                        return;
                    }
                };
                match result {
                    Ok(body) => {
                        let text = body["message"].as_str().map(str::to_string).unwrap_or_else(|| {
                            format!(
                                "running={} events={} workflows={}",
                                body["running"], body["events_generated"], body["workflows_created"]
                            )
                        });
                        self.add_message(&text, Color::Green);
                    }
                    Err(e) => self.add_message(&format!("Simulation: {e}"), Color::Red),
                }
            }
            "/scenario" => match arg {
                Some(name) => match self.client.run_scenario(name).await {
                    Ok(body) => self.add_message(
                        &format!(
                            "{} (correlation {})",
                            body["message"].as_str().unwrap_or("Scenario started"),
                            body["correlation_id"].as_str().unwrap_or("-")
                        ),
                        Color::Green,
                    ),
                    Err(e) => self.add_message(&format!("Scenario failed: {e}"), Color::Red),
                },
                None => match self.client.scenarios().await {
                    Ok(body) => {
                        self.add_message("Scenarios:", Color::Cyan);
                        for s in body["scenarios"].as_array().into_iter().flatten() {
                            self.add_message(
                                &format!(
                                    "  {} - {}",
                                    s["id"].as_str().unwrap_or("-"),
                                    s["description"].as_str().unwrap_or("")
                                ),
                                Color::White,
                            );
                        }
                    }
                    Err(e) => self.add_message(&format!("Could not list scenarios: {e}"), Color::Red),
                },
            },
            "/demo" => match self.client.quick_demo().await {
                Ok(body) => self.add_message(
                    &format!(
                        "Demo data created: {} events, {} findings, {} workflows",
                        body["created"]["events"], body["created"]["findings"], body["created"]["workflows"]
                    ),
                    Color::Green,
                ),
                Err(e) => self.add_message(&format!("Quick demo failed: {e}"), Color::Red),
            },
            other => self.add_message(&format!("Unknown command: {other}. Try /help"), Color::Yellow),
        }
    }

    async fn ask(&mut self, message: &str) {
        self.add_message(&format!("you: {message}"), Color::White);
        match self.client.chat(message).await {
            Ok(reply) => {
                for line in reply.content.lines().filter(|l| !l.trim().is_empty()) {
                    self.add_message(line, Color::LightCyan);
                }
                for action in &reply.suggested_actions {
                    self.add_message(&format!("  -> {} ({})", action.label, action.href), Color::DarkGray);
                }
            }
            Err(e) => self.add_message(&format!("Assistant unavailable: {e}"), Color::Red),
        }
    }

    fn add_message(&mut self, msg: &str, color: Color) {
        self.console_messages.push((chrono::Utc::now(), msg.to_string(), color));
        if self.console_messages.len() > MAX_MESSAGES {
            self.console_messages.remove(0);
        }
    }

    fn render(&self, frame: &mut Frame, feed: &RealtimeFeed) {
        let outer = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(5),
            ])
            .split(frame.area());

        self.render_status_bar(frame, outer[0], feed);
        self.render_main_area(frame, outer[1], feed);
        self.render_input(frame, outer[2]);
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect, feed: &RealtimeFeed) {
        let block = Block::default()
            .title(" Orbitr Operator Console ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan));

        let (status, status_color) = match (&self.server.health, &self.server.error) {
            (Some(h), _) if h["status"] == "healthy" => ("healthy".to_string(), Color::Green),
            (Some(h), _) => (h["status"].as_str().unwrap_or("unknown").to_string(), Color::Yellow),
            (None, Some(_)) => ("unreachable".to_string(), Color::Red),
            (None, None) => ("connecting".to_string(), Color::DarkGray),
        };
        let queue = self.server.health.as_ref().map(|h| h["queue_size"].to_string()).unwrap_or_else(|| "-".into());
        let sim = if feed.simulation_running() { "running" } else { "idle" };

        let status_line = Line::from(vec![
            Span::styled("  Server: ", Style::default().fg(Color::Gray)),
            Span::styled(self.client.base_url(), Style::default().fg(Color::White)),
            Span::styled("  |  Status: ", Style::default().fg(Color::Gray)),
            Span::styled(status, Style::default().fg(status_color)),
            Span::styled("  |  Queue: ", Style::default().fg(Color::Gray)),
            Span::styled(queue, Style::default().fg(Color::Magenta)),
            Span::styled("  |  Simulation: ", Style::default().fg(Color::Gray)),
            Span::styled(sim, Style::default().fg(Color::LightCyan)),
            Span::styled("  |  Stream: ", Style::default().fg(Color::Gray)),
            Span::styled(
                if feed.connected { "live" } else { "offline" },
                Style::default().fg(if feed.connected { Color::Green } else { Color::Red }),
            ),
        ]);

        frame.render_widget(Paragraph::new(status_line).block(block), area);
    }

    fn render_main_area(&self, frame: &mut Frame, area: Rect, feed: &RealtimeFeed) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(area);

        let left = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(columns[0]);
        self.render_incidents(frame, left[0]);
        self.render_workflows(frame, left[1]);

        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(10), Constraint::Min(4)])
            .split(columns[1]);
        self.render_insight_stream(frame, right[0], feed);
        self.render_console_output(frame, right[1]);
    }

    fn render_incidents(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title(format!(" Incidents ({}) ", self.server.incidents.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red));

        if self.server.incidents.is_empty() {
            let text = Paragraph::new(Line::from(Span::styled(
                "  No incidents. /demo seeds sample data.",
                Style::default().fg(Color::DarkGray),
            )))
            .block(block);
            frame.render_widget(text, area);
            return;
        }

        let rows: Vec<Row> = self
            .server
            .incidents
            .iter()
            .map(|i| {
                Row::new(vec![
                    Cell::from(Span::styled(format!("  {}", truncate(&i.id, 14)), Style::default().fg(Color::White))),
                    Cell::from(Span::styled(i.severity.clone(), Style::default().fg(severity_color(&i.severity)))),
                    Cell::from(Span::styled(i.status.clone(), Style::default().fg(Color::Gray))),
                    Cell::from(Span::styled(truncate(&i.title, 28), Style::default().fg(Color::Gray))),
                ])
            })
            .collect();

        let table = Table::new(
            rows,
            [
                Constraint::Percentage(25),
                Constraint::Percentage(15),
                Constraint::Percentage(20),
                Constraint::Percentage(40),
            ],
        )
        .block(block)
        .header(
            Row::new(vec!["  Incident", "Severity", "Status", "Event"])
                .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD)),
        );
        frame.render_widget(table, area);
    }

    fn render_workflows(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title(format!(" Pending Workflows ({}) ", self.server.workflows.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow));

        if self.server.workflows.is_empty() {
            let text = Paragraph::new(Line::from(Span::styled(
                "  No pending workflows.",
                Style::default().fg(Color::DarkGray),
            )))
            .block(block);
            frame.render_widget(text, area);
            return;
        }

        let rows: Vec<Row> = self
            .server
            .workflows
            .iter()
            .map(|w| {
                Row::new(vec![
                    Cell::from(Span::styled(format!("  {}", w.workflow_id), Style::default().fg(Color::White))),
                    Cell::from(Span::styled(w.workflow_type.clone(), Style::default().fg(Color::Gray))),
                    Cell::from(Span::styled(w.status.clone(), Style::default().fg(workflow_status_color(&w.status)))),
                    Cell::from(Span::styled(
                        format!("{}/{}", w.current_step, w.total_steps),
                        Style::default().fg(Color::Gray),
                    )),
                ])
            })
            .collect();

        let table = Table::new(
            rows,
            [
                Constraint::Percentage(30),
                Constraint::Percentage(30),
                Constraint::Percentage(25),
                Constraint::Percentage(15),
            ],
        )
        .block(block)
        .header(
            Row::new(vec!["  Workflow", "Type", "Status", "Step"])
                .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD)),
        );
        frame.render_widget(table, area);
    }

    fn render_insight_stream(&self, frame: &mut Frame, area: Rect, feed: &RealtimeFeed) {
        let block = Block::default()
            .title(format!(" Live Insights ({} received) ", feed.received))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::LightBlue));

        let visible = area.height.saturating_sub(2) as usize;
        let lines: Vec<Line> = feed
            .insights
            .iter()
            .take(visible)
            .map(|insight| {
                let severity = insight["severity"].as_str().unwrap_or("-");
                Line::from(vec![
                    Span::styled(format!("  {:<8} ", severity), Style::default().fg(severity_color(severity))),
                    Span::styled(
                        truncate(insight["summary"].as_str().unwrap_or(""), 60),
                        Style::default().fg(Color::Gray),
                    ),
                ])
            })
            .collect();

        let paragraph = if lines.is_empty() {
            Paragraph::new(Line::from(Span::styled("  Waiting for events...", Style::default().fg(Color::DarkGray))))
        } else {
            Paragraph::new(lines)
        };
        frame.render_widget(paragraph.block(block), area);
    }

    fn render_console_output(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title(" Console Output ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White));

        let inner_height = area.height.saturating_sub(2) as usize;
        let start = self.console_messages.len().saturating_sub(inner_height);
        let lines: Vec<Line> = self.console_messages[start..]
            .iter()
            .map(|(ts, msg, color)| {
                Line::from(vec![
                    Span::styled(format!("  [{}] ", ts.format("%H:%M:%S")), Style::default().fg(Color::DarkGray)),
                    Span::styled(msg.as_str(), Style::default().fg(*color)),
                ])
            })
            .collect();

        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn render_input(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title(" Input (Enter = ask assistant, /help = commands, /quit = exit) ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green));

        let input_display = if self.input.is_empty() {
            Line::from(vec![
                Span::styled("  > ", Style::default().fg(Color::Green)),
                Span::styled("Ask about incidents or type /command...", Style::default().fg(Color::DarkGray)),
            ])
        } else {
            Line::from(vec![
                Span::styled("  > ", Style::default().fg(Color::Green)),
                Span::styled(&self.input, Style::default().fg(Color::White)),
            ])
        };

        let hint_line = Line::from(Span::styled(
            "  Ctrl+C or /quit to exit  |  Up/Down for history  |  Enter to submit",
            Style::default().fg(Color::DarkGray),
        ));

        frame.render_widget(Paragraph::new(vec![Line::from(""), input_display, hint_line]).block(block), area);

        let cursor_x = area.x + 4 + self.cursor_pos as u16;
        frame.set_cursor_position((cursor_x, area.y + 2));
    }

    /// Handle keyboard input. Returns `true` if the console should exit.
    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> bool {
        match (code, modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => return true,
            (KeyCode::Char(c), _) => {
                self.input.insert(self.cursor_pos, c);
                self.cursor_pos += c.len_utf8();
            }
            (KeyCode::Backspace, _) => {
                if let Some((idx, _)) = self.input[..self.cursor_pos].char_indices().next_back() {
                    self.input.remove(idx);
                    self.cursor_pos = idx;
                }
            }
            (KeyCode::Delete, _) => {
                if self.cursor_pos < self.input.len() {
                    self.input.remove(self.cursor_pos);
                }
            }
            (KeyCode::Left, _) => {
                if let Some((idx, _)) = self.input[..self.cursor_pos].char_indices().next_back() {
                    self.cursor_pos = idx;
                }
            }
            (KeyCode::Right, _) => {
                if let Some(c) = self.input[self.cursor_pos..].chars().next() {
                    self.cursor_pos += c.len_utf8();
                }
            }
            (KeyCode::Home, _) => self.cursor_pos = 0,
            (KeyCode::End, _) => self.cursor_pos = self.input.len(),
            (KeyCode::Up, _) => {
                if !self.history.is_empty() {
                    let pos = match self.history_pos {
                        Some(p) if p > 0 => p - 1,
                        Some(p) => p,
                        None => self.history.len() - 1,
                    };
                    self.history_pos = Some(pos);
                    self.input = self.history[pos].clone();
                    self.cursor_pos = self.input.len();
                }
            }
            (KeyCode::Down, _) => {
                if let Some(pos) = self.history_pos {
                    if pos + 1 < self.history.len() {
                        self.history_pos = Some(pos + 1);
                        self.input = self.history[pos + 1].clone();
                    } else {
                        self.history_pos = None;
                        self.input.clear();
                    }
                    self.cursor_pos = self.input.len();
                }
            }
            _ => {}
        }
        false
    }
}

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    Terminal::new(CrosstermBackend::new(stdout))
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Run the console against the server at `base_url` until the operator quits.
pub async fn run_operator_console(base_url: String) -> Result<(), anyhow::Error> {
    use std::io::IsTerminal;
    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        return Err(anyhow::anyhow!("Operator console requires a terminal (TTY)."));
    }

    let client = ApiClient::new(base_url.clone())?;
    let feed = spawn_feed(ws_url(&base_url));

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));

    let mut terminal = setup_terminal()?;
    let mut console = OperatorConsole::new(client, feed.clone());
    let tick_rate = Duration::from_millis(100);
    let mut last_refresh: Option<Instant> = None;

    loop {
        if last_refresh.map_or(true, |t| t.elapsed() >= REFRESH_EVERY) {
            console.refresh().await;
            last_refresh = Some(Instant::now());
        }

        let snapshot = feed.lock().map(|f| f.clone()).unwrap_or_default();
        terminal.draw(|frame| console.render(frame, &snapshot))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key_event) = event::read()? {
                if key_event.kind == KeyEventKind::Press {
                    if key_event.code == KeyCode::Enter {
                        let trimmed = console.input.trim().to_string();
                        if trimmed == "/quit" || trimmed == "/exit" || trimmed == "/q" {
                            break;
                        }
                        console.process_input().await;
                        last_refresh = None;
                    } else if console.handle_key(key_event.code, key_event.modifiers) {
                        break;
                    }
                }
            }
        }
    }

    restore_terminal(&mut terminal)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn console() -> OperatorConsole {
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        OperatorConsole::new(client, Arc::new(Mutex::new(RealtimeFeed::default())))
    }

    #[test]
    fn test_views_parse_server_payloads() {
        let incidents = incident_views(&json!({
            "incidents": [{"id": "corr-1", "title": "secret_detected", "severity": "critical", "status": "active", "findings": 2}]
        }));
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].findings, 2);

        let workflows = workflow_views(&json!({
            "workflows": [{"workflow_id": "WF-1", "workflow_type": "change_approval", "status": "pending", "current_step": 1, "steps": [{}, {}, {}]}]
        }));
        assert_eq!(workflows[0].total_steps, 3);
        assert_eq!(workflows[0].current_step, 1);
        assert!(incident_views(&json!({})).is_empty(), "missing list yields nothing");
    }

    #[test]
    fn test_history_navigation() {
        let mut console = console();
        console.history = vec!["/status".into(), "/incidents".into()];
        console.handle_key(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(console.input, "/incidents");
        console.handle_key(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(console.input, "/status");
        console.handle_key(KeyCode::Down, KeyModifiers::NONE);
        console.handle_key(KeyCode::Down, KeyModifiers::NONE);
        assert_eq!(console.input, "", "past the newest entry clears the input");
    }

    #[test]
    fn test_editing_handles_multibyte_input() {
        let mut console = console();
        for c in "née".chars() {
            console.handle_key(KeyCode::Char(c), KeyModifiers::NONE);
        }
        console.handle_key(KeyCode::Backspace, KeyModifiers::NONE);
        assert_eq!(console.input, "né");
        console.handle_key(KeyCode::Left, KeyModifiers::NONE);
        console.handle_key(KeyCode::Backspace, KeyModifiers::NONE);
        assert_eq!(console.input, "é");
        assert!(console.handle_key(KeyCode::Char('c'), KeyModifiers::CONTROL), "ctrl+c exits");
    }

    #[test]
    fn test_message_log_is_capped() {
        let mut console = console();
        for i in 0..(MAX_MESSAGES + 20) {
            console.add_message(&format!("line {i}"), Color::White);
        }
        assert_eq!(console.console_messages.len(), MAX_MESSAGES);
        assert_eq!(console.console_messages.last().map(|m| m.1.as_str()), Some("line 519"));
    }
}
