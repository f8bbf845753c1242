//! Drives a scripted stand-in engine through a real child process.
#![cfg(unix)]

use std::time::{
  Duration,
  Instant,
};

use xi_rpc::{
  Bridge,
  EngineCommand,
  LaunchError,
  RawLine,
  Session,
  SessionError,
  TabId,
  Update,
  UpdateListener,
};

const ENGINE: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"new_tab"'*)
      printf '{"id":%s,"result":"1"}\n' "$id" ;;
    *'"render_lines"'*)
      printf '{"id":%s,"result":[["fn main() {}",[["fg",0,2,-16777216,1]]],["",[["cursor",0]]]]}\n' "$id" ;;
    *'"method":"open"'*)
      echo "opening" >&2
      printf '{"method":"update","params":{"tab":"1","update":{"first_line":0,"height":2,"lines":[["fn main() {}",[]]]}}}\n' ;;
  esac
done
"#;

#[derive(Default)]
struct Client {
  tab:     Option<TabId>,
  updates: Vec<Update>,
  lines:   Vec<RawLine>,
  lost:    Option<String>,
}

impl UpdateListener for Client {
  fn tracked_tab(&self) -> Option<&TabId> {
    self.tab.as_ref()
  }

  fn on_update(&mut self, _bridge: &mut Bridge<Self>, _tab: &TabId, update: Update) {
    self.updates.push(update);
  }

  fn on_transport_lost(&mut self, reason: &str) {
    self.lost = Some(reason.to_string());
  }
}

fn scripted_engine() -> EngineCommand {
  EngineCommand::new("sh").arg("-c").arg(ENGINE)
}

fn pump_until(
  session: &mut Session<Client>,
  client: &mut Client,
  done: impl Fn(&Client) -> bool,
) -> Result<(), SessionError> {
  let deadline = Instant::now() + Duration::from_secs(5);
  while !done(client) {
    assert!(Instant::now() < deadline, "timed out waiting for engine");
    session.pump_timeout(client, Duration::from_millis(50))?;
  }
  Ok(())
}

#[test]
fn new_tab_open_and_render_round_trip() {
  let mut session = Session::<Client>::start(&scripted_engine()).expect("engine starts");
  let mut client = Client::default();

  session
    .bridge()
    .new_tab(|client: &mut Client, bridge: &mut Bridge<Client>, tab: TabId| {
      bridge.open(&tab, "main.rs").expect("open is sent");
      client.tab = Some(tab);
    })
    .expect("new_tab is sent");
  pump_until(&mut session, &mut client, |client| !client.updates.is_empty()).unwrap();

  assert_eq!(client.tab, Some(TabId::new("1")));
  assert_eq!(client.updates[0].height, Some(2));

  let tab = client.tab.clone().unwrap();
  session
    .bridge()
    .render_lines(&tab, 0, 2, |client: &mut Client, _: &mut Bridge<Client>, lines| {
      client.lines = lines;
    })
    .expect("render_lines is sent");
  pump_until(&mut session, &mut client, |client| !client.lines.is_empty()).unwrap();

  assert_eq!(client.lines.len(), 2);
  assert_eq!(client.lines[0].text, "fn main() {}");
  assert_eq!(session.bridge().pending_len(), 0);

  let exit = session.shutdown(Duration::from_secs(5)).expect("clean shutdown");
  assert_eq!(exit, Some(0));
  assert!(client.lost.is_none());
}

#[test]
fn engine_exit_without_close_is_transport_lost() {
  let command = EngineCommand::new("sh").arg("-c").arg("exit 0");
  let mut session = Session::<Client>::start(&command).expect("engine starts");
  let mut client = Client::default();

  let result = pump_until(&mut session, &mut client, |client| client.lost.is_some());
  assert!(matches!(result, Err(SessionError::TransportLost(_))));
  assert!(!session.is_running());
  assert!(matches!(
    session.pump(&mut client),
    Err(SessionError::TransportLost(_))
  ));
}

#[test]
fn sends_fail_once_the_engine_output_is_gone() {
  let command = EngineCommand::new("sh").arg("-c").arg("exec 1>&-; sleep 3");
  let mut session = Session::<Client>::start(&command).expect("engine starts");
  let mut client = Client::default();

  let result = pump_until(&mut session, &mut client, |client| client.lost.is_some());
  assert!(matches!(result, Err(SessionError::TransportLost(_))));

  let tab = TabId::new("1");
  assert!(session.bridge().insert(&tab, "x").is_err());
  assert!(session.bridge().new_tab(|_, _, _| {}).is_err());
  assert_eq!(session.bridge().pending_len(), 0);

  session
    .shutdown(Duration::from_millis(50))
    .expect("engine is killed after the grace period");
}

#[test]
fn close_is_not_an_error() {
  let mut session = Session::<Client>::start(&scripted_engine()).expect("engine starts");
  let mut client = Client::default();
  session.close();

  for _ in 0..10 {
    session
      .pump_timeout(&mut client, Duration::from_millis(20))
      .expect("close ends the stream cleanly");
  }
  assert!(client.lost.is_none());
  assert!(session.bridge().new_tab(|_, _, _| {}).is_err());
}

#[test]
fn missing_executable_is_a_launch_error() {
  let command = EngineCommand::new("/definitely/not/an/engine");
  assert!(matches!(
    Session::<Client>::start(&command),
    Err(LaunchError::Spawn { .. })
  ));
}
