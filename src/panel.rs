//! the chat panel: ui tree, prompt input and the per-message state machine.
//!
//! idle -> sending (enter / send button with non-blank text) -> rendering (on
//! `chatResponse`) -> idle. nothing locks the input while a reply is out, so a
//! panel can have several requests pending; each response is matched to its
//! request by id.

use bevy::input::keyboard::{Key, KeyboardInput};
use bevy::input::mouse::{MouseScrollUnit, MouseWheel};
use bevy::prelude::*;
use bevy::ui::RelativeCursorPosition;

use crate::bridge::{ChatReply, PanelMessage, RequestId, ToHost, ToPanel};
use crate::conversation::Conversation;
use crate::probe::ModelStatus;
use crate::render::{Block, RichText, SpanStyle, StyledSpan, render_markdown};
use crate::reply::FinalReply;
use crate::{ChatConfig, ChatFonts, StartChat};

const BG: Color = Color::srgb(0.118, 0.118, 0.118);
const TEXT: Color = Color::WHITE;
const MUTED: Color = Color::srgb(0.55, 0.55, 0.55);
const BORDER: Color = Color::srgb(0.267, 0.267, 0.267);
const USER_BG: Color = Color::srgb(0.0, 0.482, 1.0);
const REPLY_BG: Color = Color::srgb(0.2, 0.2, 0.2);
const INPUT_BG: Color = Color::srgb(0.145, 0.145, 0.149);
const BUTTON_BG: Color = Color::srgb(0.0, 0.482, 1.0);
const BUTTON_HOVER: Color = Color::srgb(0.0, 0.337, 0.702);
const TOGGLE_BG: Color = Color::srgb(0.267, 0.267, 0.267);
const TOGGLE_ACTIVE: Color = Color::srgb(0.333, 0.333, 0.333);
const REASONING_BG: Color = Color::srgb(0.133, 0.133, 0.133);
const REASONING_TEXT: Color = Color::srgb(0.867, 0.867, 0.867);
const CODE_BG: Color = Color::srgba(0.514, 0.506, 0.506, 0.25);
const CODE_TEXT: Color = Color::srgb(0.85, 0.75, 0.6);
const LINK: Color = Color::srgb(0.45, 0.7, 1.0);

const INPUT_PADDING: f32 = 10.0;
const PLACEHOLDER: &str = "Type your message...";

/// request bookkeeping for one open panel. sits next to its [`Conversation`].
#[derive(Component, Debug, Default)]
pub struct ChatPanel {
    last_id: RequestId,
    pending: Vec<RequestId>,
}

impl ChatPanel {
    pub fn begin_request(&mut self) -> RequestId {
        self.last_id = self.last_id.next();
        self.pending.push(self.last_id);
        self.last_id
    }

    /// true if `id` was outstanding on this panel.
    pub fn settle(&mut self, id: RequestId) -> bool {
        match self.pending.iter().position(|p| *p == id) {
            Some(idx) => {
                self.pending.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> &[RequestId] {
        &self.pending
    }
}

/// text typed into the panel's input box.
#[derive(Component, Debug, Default)]
pub struct PromptInput {
    pub text: String,
}

/// links a ui entity back to the panel root it belongs to.
#[derive(Component, Clone, Copy, Debug)]
pub struct PanelOf(pub Entity);

#[derive(Component)]
pub struct PanelDock;
#[derive(Component)]
pub struct MessageList;
#[derive(Component)]
pub struct MessageBubble;
#[derive(Component)]
pub(crate) struct InputBox;
#[derive(Component)]
pub(crate) struct PromptText;
#[derive(Component)]
pub(crate) struct SendButton;
#[derive(Component)]
pub(crate) struct CloseButton;
#[derive(Component)]
pub(crate) struct StatusLine;

/// "Thought Process" button. starts collapsed.
#[derive(Component, Debug)]
pub struct ReasoningToggle {
    pub body: Entity,
    pub expanded: bool,
}

#[derive(Component)]
pub struct ReasoningBody;

/// which panel receives keyboard input.
#[derive(Resource, Debug, Default)]
pub struct FocusedPanel(pub Option<Entity>);

/// asks a panel to send whatever is in its input box.
#[derive(Event, Clone, Copy, Debug)]
pub struct SubmitPrompt(pub Entity);

/// input box height for prompt text laid out `content_height` tall, clamped to the configured band.
pub fn input_height(content_height: f32, config: &ChatConfig) -> f32 {
    (content_height + INPUT_PADDING * 2.0).clamp(config.input_min_height, config.input_max_height)
}

fn input_overflows(content_height: f32, config: &ChatConfig) -> bool {
    content_height + INPUT_PADDING * 2.0 > config.input_max_height
}

/// height of the prompt text in logical px. the layout pass measures soft wraps;
/// explicit lines count until it has run for the current text.
fn prompt_content_height(text: &str, layout: &ComputedNode, config: &ChatConfig) -> f32 {
    let lines = text.split('\n').count().max(1) as f32 * config.line_height;
    if layout.is_empty() {
        return lines;
    }
    (layout.size().y * layout.inverse_scale_factor()).max(lines)
}

impl ChatFonts {
    fn pick(&self, style: &SpanStyle) -> Handle<Font> {
        if style.code {
            self.mono.clone()
        } else if style.strong {
            self.bold.clone()
        } else if style.emphasis {
            self.italic.clone()
        } else {
            self.regular.clone()
        }
    }
}

fn span_color(style: &SpanStyle) -> Color {
    if let Some([r, g, b]) = style.color {
        Color::srgb_u8(r, g, b)
    } else if style.link {
        LINK
    } else if style.code {
        CODE_TEXT
    } else if style.strikethrough {
        MUTED
    } else {
        TEXT
    }
}

fn heading_size(base: f32, level: u8) -> f32 {
    match level {
        1 => base * 1.6,
        2 => base * 1.4,
        3 => base * 1.2,
        _ => base * 1.05,
    }
}

// ---------------------- spawning ----------------------

/// builds a fresh panel under `dock`. every call is a new panel with an empty conversation.
pub fn spawn_chat_panel(
    commands: &mut Commands,
    dock: Entity,
    config: &ChatConfig,
    fonts: &ChatFonts,
) -> Entity {
    let font = |size: f32| TextFont { font: fonts.regular.clone(), font_size: size, ..default() };
    let panel = commands
        .spawn((
            Node {
                flex_grow: 1.0,
                flex_basis: Val::Px(0.0),
                height: Val::Percent(100.0),
                flex_direction: FlexDirection::Column,
                border: UiRect::all(Val::Px(1.0)),
                ..default()
            },
            BackgroundColor(BG),
            BorderColor(BORDER),
            ChatPanel::default(),
            Conversation::default(),
            PromptInput::default(),
            Name::new(config.title.clone()),
            ChildOf(dock),
        ))
        .id();

    commands.entity(panel).with_children(|p| {
        // --- title bar ---
        p.spawn((
            Node {
                width: Val::Percent(100.0),
                padding: UiRect::axes(Val::Px(12.0), Val::Px(6.0)),
                justify_content: JustifyContent::SpaceBetween,
                align_items: AlignItems::Center,
                border: UiRect::bottom(Val::Px(1.0)),
                ..default()
            },
            BorderColor(BORDER),
        ))
        .with_children(|bar| {
            bar.spawn((Text::new(config.title.clone()), font(config.font_size), TextColor(TEXT)));
            bar.spawn((
                Button,
                Node {
                    width: Val::Px(24.0),
                    height: Val::Px(24.0),
                    align_items: AlignItems::Center,
                    justify_content: JustifyContent::Center,
                    ..default()
                },
                BorderRadius::all(Val::Px(4.0)),
                BackgroundColor(Color::NONE),
                CloseButton,
                PanelOf(panel),
            ))
            .with_children(|b| {
                b.spawn((Text::new("x"), font(config.font_size), TextColor(MUTED)));
            });
        });

        // --- model status ---
        p.spawn((
            Text::new(""),
            font(config.font_size * 0.8),
            TextColor(Color::srgb(0.95, 0.75, 0.3)),
            Node {
                display: Display::None,
                padding: UiRect::axes(Val::Px(12.0), Val::Px(4.0)),
                ..default()
            },
            StatusLine,
            PanelOf(panel),
        ));

        // --- messages ---
        p.spawn((
            Node {
                flex_grow: 1.0,
                width: Val::Percent(100.0),
                flex_direction: FlexDirection::Column,
                padding: UiRect::all(Val::Px(15.0)),
                overflow: Overflow::scroll_y(),
                ..default()
            },
            ScrollPosition::default(),
            RelativeCursorPosition::default(),
            MessageList,
            PanelOf(panel),
        ));

        // --- input row ---
        p.spawn((
            Node {
                width: Val::Percent(100.0),
                align_items: AlignItems::FlexStart,
                padding: UiRect::all(Val::Px(10.0)),
                border: UiRect::top(Val::Px(1.0)),
                column_gap: Val::Px(10.0),
                ..default()
            },
            BorderColor(BORDER),
        ))
        .with_children(|row| {
            row.spawn((
                Button,
                Node {
                    flex_grow: 1.0,
                    flex_direction: FlexDirection::Column,
                    height: Val::Px(config.input_min_height),
                    min_height: Val::Px(config.input_min_height),
                    max_height: Val::Px(config.input_max_height),
                    padding: UiRect::all(Val::Px(INPUT_PADDING)),
                    overflow: Overflow::clip_y(),
                    ..default()
                },
                BorderRadius::all(Val::Px(8.0)),
                BackgroundColor(INPUT_BG),
                ScrollPosition::default(),
                InputBox,
                PanelOf(panel),
            ))
            .with_children(|b| {
                b.spawn((
                    Text::new(PLACEHOLDER),
                    TextFont {
                        font: fonts.regular.clone(),
                        font_size: config.font_size,
                        line_height: bevy::text::LineHeight::Px(config.line_height),
                        ..default()
                    },
                    TextColor(MUTED),
                    Node { flex_shrink: 0.0, ..default() },
                    PromptText,
                    PanelOf(panel),
                ));
            });
            row.spawn((
                Button,
                Node {
                    min_width: Val::Px(70.0),
                    padding: UiRect::axes(Val::Px(15.0), Val::Px(10.0)),
                    align_self: AlignSelf::Center,
                    justify_content: JustifyContent::Center,
                    ..default()
                },
                BorderRadius::all(Val::Px(6.0)),
                BackgroundColor(BUTTON_BG),
                SendButton,
                PanelOf(panel),
            ))
            .with_children(|b| {
                b.spawn((Text::new("Send"), font(config.font_size), TextColor(TEXT)));
            });
        });
    });

    panel
}

fn spawn_bubble(commands: &mut Commands, list: Entity, background: Color, align: AlignSelf) -> Entity {
    commands
        .spawn((
            Node {
                flex_direction: FlexDirection::Column,
                padding: UiRect::axes(Val::Px(15.0), Val::Px(10.0)),
                margin: UiRect::vertical(Val::Px(5.0)),
                max_width: Val::Percent(90.0),
                align_self: align,
                ..default()
            },
            BorderRadius::all(Val::Px(12.0)),
            BackgroundColor(background),
            MessageBubble,
            ChildOf(list),
        ))
        .id()
}

fn spawn_text_line(
    commands: &mut Commands,
    parent: Entity,
    spans: &[StyledSpan],
    fonts: &ChatFonts,
    size: f32,
) -> Entity {
    let text = commands
        .spawn((
            Text::new(""),
            TextFont { font: fonts.regular.clone(), font_size: size, ..default() },
            TextColor(TEXT),
            ChildOf(parent),
        ))
        .id();
    for span in spans {
        commands.spawn((
            TextSpan::new(span.text.clone()),
            TextFont { font: fonts.pick(&span.style), font_size: size, ..default() },
            TextColor(span_color(&span.style)),
            ChildOf(text),
        ));
    }
    text
}

fn spawn_rich_text(
    commands: &mut Commands,
    parent: Entity,
    rich: &RichText,
    fonts: &ChatFonts,
    size: f32,
) {
    for block in &rich.blocks {
        match block {
            Block::Paragraph(spans) => {
                spawn_text_line(commands, parent, spans, fonts, size);
            }
            Block::Heading { level, spans } => {
                let line = spawn_text_line(commands, parent, spans, fonts, heading_size(size, *level));
                commands.entity(line).insert(Node {
                    margin: UiRect { top: Val::Px(size * 0.6), bottom: Val::Px(size * 0.3), ..default() },
                    ..default()
                });
            }
            Block::ListItem { marker, spans, .. } => {
                let mut line = Vec::with_capacity(spans.len() + 1);
                line.push(StyledSpan::new(marker.clone(), SpanStyle::default()));
                line.extend(spans.iter().cloned());
                let item = spawn_text_line(commands, parent, &line, fonts, size);
                commands.entity(item).insert(Node { margin: UiRect::left(Val::Px(20.0)), ..default() });
            }
            Block::Quote(spans) => {
                let quote = commands
                    .spawn((
                        Node {
                            padding: UiRect::left(Val::Px(8.0)),
                            border: UiRect::left(Val::Px(3.0)),
                            margin: UiRect::vertical(Val::Px(4.0)),
                            ..default()
                        },
                        BorderColor(BORDER),
                        ChildOf(parent),
                    ))
                    .id();
                spawn_text_line(commands, quote, spans, fonts, size);
            }
            Block::Code { lines, .. } => {
                let code = commands
                    .spawn((
                        Node {
                            padding: UiRect::all(Val::Px(8.0)),
                            margin: UiRect::vertical(Val::Px(10.0)),
                            ..default()
                        },
                        BorderRadius::all(Val::Px(3.0)),
                        BackgroundColor(CODE_BG),
                        ChildOf(parent),
                    ))
                    .id();
                let mut spans = Vec::new();
                for (i, line) in lines.iter().enumerate() {
                    if i > 0 {
                        spans.push(StyledSpan::new("\n", SpanStyle::code()));
                    }
                    spans.extend(line.iter().cloned());
                }
                spawn_text_line(commands, code, &spans, fonts, size * 0.9);
            }
            Block::TableRow { header, cells } => {
                let row = commands
                    .spawn((
                        Node { column_gap: Val::Px(16.0), ..default() },
                        ChildOf(parent),
                    ))
                    .id();
                for cell in cells {
                    let cell: Vec<StyledSpan> = cell
                        .iter()
                        .map(|s| StyledSpan::new(s.text.clone(), SpanStyle { strong: *header, ..s.style }))
                        .collect();
                    let text = spawn_text_line(commands, row, &cell, fonts, size);
                    commands.entity(text).insert(Node { min_width: Val::Px(80.0), ..default() });
                }
            }
            Block::Rule => {
                commands.spawn((
                    Node {
                        width: Val::Percent(100.0),
                        height: Val::Px(1.0),
                        margin: UiRect::vertical(Val::Px(8.0)),
                        ..default()
                    },
                    BackgroundColor(BORDER),
                    ChildOf(parent),
                ));
            }
        }
    }
}

fn spawn_user_bubble(commands: &mut Commands, list: Entity, text: &str, fonts: &ChatFonts, size: f32) {
    let bubble = spawn_bubble(commands, list, USER_BG, AlignSelf::FlexStart);
    commands.spawn((
        Text::new(text),
        TextFont { font: fonts.regular.clone(), font_size: size, ..default() },
        TextColor(TEXT),
        ChildOf(bubble),
    ));
}

/// reply bubble: optional collapsed reasoning toggle, then the rendered answer.
fn spawn_reply_bubble(
    commands: &mut Commands,
    list: Entity,
    reply: &FinalReply,
    fonts: &ChatFonts,
    size: f32,
) -> Entity {
    let bubble = spawn_bubble(commands, list, REPLY_BG, AlignSelf::FlexEnd);

    if let Some(reasoning) = &reply.reasoning {
        commands.entity(bubble).insert(Node {
            flex_direction: FlexDirection::Column,
            padding: UiRect::axes(Val::Px(15.0), Val::Px(10.0)),
            margin: UiRect::vertical(Val::Px(5.0)),
            width: Val::Percent(100.0),
            align_self: AlignSelf::FlexEnd,
            ..default()
        });
        let body = commands
            .spawn((
                Node {
                    display: Display::None,
                    padding: UiRect::all(Val::Px(10.0)),
                    border: UiRect::left(Val::Px(3.0)),
                    margin: UiRect::bottom(Val::Px(5.0)),
                    ..default()
                },
                BackgroundColor(REASONING_BG),
                BorderColor(USER_BG),
                ReasoningBody,
            ))
            .with_children(|b| {
                b.spawn((
                    Text::new(reasoning.clone()),
                    TextFont { font: fonts.mono.clone(), font_size: size * 0.9, ..default() },
                    TextColor(REASONING_TEXT),
                ));
            })
            .id();
        commands
            .spawn((
                Button,
                Node {
                    width: Val::Percent(100.0),
                    padding: UiRect::all(Val::Px(10.0)),
                    margin: UiRect::vertical(Val::Px(5.0)),
                    ..default()
                },
                BorderRadius::all(Val::Px(12.0)),
                BackgroundColor(TOGGLE_BG),
                ReasoningToggle { body, expanded: false },
                ChildOf(bubble),
            ))
            .with_children(|b| {
                b.spawn((
                    Text::new("Thought Process"),
                    TextFont { font: fonts.regular.clone(), font_size: size, ..default() },
                    TextColor(TEXT),
                ));
            });
        commands.entity(body).insert(ChildOf(bubble));
    }

    let answer = commands
        .spawn((Node { flex_direction: FlexDirection::Column, ..default() }, ChildOf(bubble)))
        .id();
    spawn_rich_text(commands, answer, &render_markdown(&reply.visible), fonts, size);
    bubble
}

fn scroll_to_newest(scroll: &mut ScrollPosition) {
    // layout clamps this to the content height
    scroll.offset_y = f32::MAX;
}

// ---------------------- systems ----------------------

pub(crate) fn open_panel_on_hotkey(
    keys: Res<ButtonInput<KeyCode>>,
    config: Res<ChatConfig>,
    mut start: EventWriter<StartChat>,
) {
    if let Some(key) = config.open_panel_key
        && keys.just_pressed(key)
    {
        info!(target: "bevy_deepchat", "hotkey {:?} -> StartChat", key);
        start.write(StartChat);
    }
}

pub(crate) fn spawn_panels(
    mut commands: Commands,
    mut opened: EventReader<StartChat>,
    config: Res<ChatConfig>,
    fonts: Res<ChatFonts>,
    docks: Query<Entity, With<PanelDock>>,
    mut focus: ResMut<FocusedPanel>,
) {
    let count = opened.read().count();
    if count == 0 {
        return;
    }
    let dock = match docks.iter().next() {
        Some(dock) => dock,
        None => commands
            .spawn((
                Node {
                    width: Val::Percent(100.0),
                    height: Val::Percent(100.0),
                    flex_direction: FlexDirection::Row,
                    ..default()
                },
                PanelDock,
            ))
            .id(),
    };
    for _ in 0..count {
        let panel = spawn_chat_panel(&mut commands, dock, &config, &fonts);
        info!(target: "bevy_deepchat", "opened chat panel {:?}", panel);
        focus.0 = Some(panel);
    }
}

pub(crate) fn focus_on_click(
    q: Query<(&Interaction, &PanelOf), (Changed<Interaction>, With<InputBox>)>,
    mut focus: ResMut<FocusedPanel>,
) {
    for (interaction, PanelOf(panel)) in &q {
        if *interaction == Interaction::Pressed && focus.0 != Some(*panel) {
            debug!(target: "bevy_deepchat", "focus -> {:?}", panel);
            focus.0 = Some(*panel);
        }
    }
}

pub(crate) fn type_into_prompt(
    mut ev_kbd: EventReader<KeyboardInput>,
    keys: Res<ButtonInput<KeyCode>>,
    focus: Res<FocusedPanel>,
    mut prompts: Query<&mut PromptInput>,
    mut submit: EventWriter<SubmitPrompt>,
) {
    let Some(panel) = focus.0 else {
        ev_kbd.clear();
        return;
    };
    let Ok(mut prompt) = prompts.get_mut(panel) else {
        ev_kbd.clear();
        return;
    };
    let shift = keys.any_pressed([KeyCode::ShiftLeft, KeyCode::ShiftRight]);
    let other_modifier = keys.any_pressed([
        KeyCode::ControlLeft,
        KeyCode::ControlRight,
        KeyCode::AltLeft,
        KeyCode::AltRight,
        KeyCode::SuperLeft,
        KeyCode::SuperRight,
    ]);

    for ev in ev_kbd.read() {
        if !ev.state.is_pressed() {
            continue;
        }
        match &ev.logical_key {
            Key::Enter if shift => prompt.text.push('\n'),
            // only a bare enter sends
            Key::Enter if other_modifier => {}
            Key::Enter => {
                submit.write(SubmitPrompt(panel));
            }
            Key::Backspace => {
                prompt.text.pop();
            }
            _ => {
                if let Some(txt) = &ev.text {
                    prompt.text.extend(txt.chars().filter(|c| !c.is_control()));
                }
            }
        }
    }
}

pub(crate) fn click_send(
    q: Query<(&Interaction, &PanelOf), (Changed<Interaction>, With<SendButton>)>,
    mut submit: EventWriter<SubmitPrompt>,
) {
    for (interaction, PanelOf(panel)) in &q {
        if *interaction == Interaction::Pressed {
            submit.write(SubmitPrompt(*panel));
        }
    }
}

/// idle -> sending. blank input is a no-op and keeps whatever was typed.
pub(crate) fn send_prompts(
    mut commands: Commands,
    mut submits: EventReader<SubmitPrompt>,
    mut panels: Query<(&mut ChatPanel, &mut Conversation, &mut PromptInput)>,
    mut lists: Query<(Entity, &PanelOf, &mut ScrollPosition), With<MessageList>>,
    mut to_host: EventWriter<ToHost>,
    config: Res<ChatConfig>,
    fonts: Res<ChatFonts>,
) {
    for SubmitPrompt(panel) in submits.read() {
        let Ok((mut state, mut convo, mut prompt)) = panels.get_mut(*panel) else {
            continue;
        };
        let Some(turn) = convo.submit(&prompt.text) else {
            continue;
        };
        let text = turn.content.clone();
        prompt.text.clear();
        let id = state.begin_request();
        info!(
            target: "bevy_deepchat",
            "panel {:?}: sending request {} (turns={}, pending={})",
            panel, id, convo.len(), state.pending().len()
        );

        if let Some((list, _, mut scroll)) = lists.iter_mut().find(|(_, owner, _)| owner.0 == *panel) {
            spawn_user_bubble(&mut commands, list, &text, &fonts, config.font_size);
            scroll_to_newest(&mut scroll);
        }
        to_host.write(ToHost {
            panel: *panel,
            message: PanelMessage::Chat { id, text: convo.turns().to_vec() },
        });
    }
}

/// rendering -> idle. errors are shown but never become assistant turns.
pub(crate) fn receive_replies(
    mut commands: Commands,
    mut replies: EventReader<ToPanel>,
    mut panels: Query<(&mut ChatPanel, &mut Conversation)>,
    mut lists: Query<(Entity, &PanelOf, &mut ScrollPosition), With<MessageList>>,
    config: Res<ChatConfig>,
    fonts: Res<ChatFonts>,
) {
    for ToPanel { panel, message } in replies.read() {
        let PanelMessage::ChatResponse { id, text: reply } = message else {
            warn!(target: "bevy_deepchat", "panel {:?}: unexpected message {:?}", panel, message.id());
            continue;
        };
        let Ok((mut state, mut convo)) = panels.get_mut(*panel) else {
            debug!(target: "bevy_deepchat", "reply {} for closed panel {:?} dropped", id, panel);
            continue;
        };
        if !state.settle(*id) {
            warn!(target: "bevy_deepchat", "panel {:?}: no pending request {}, reply dropped", panel, id);
            continue;
        }

        let final_reply = FinalReply::extract(&reply.display_text());
        match reply {
            ChatReply::Ok(_) => convo.append_reply(final_reply.visible.clone()),
            ChatReply::Error(err) => {
                warn!(target: "bevy_deepchat", "panel {:?}: request {} failed: {}", panel, id, err);
            }
        }
        debug!(
            target: "bevy_deepchat",
            "panel {:?}: rendering reply {} (reasoning={}, len={})",
            panel, id, final_reply.has_reasoning(), final_reply.visible.len()
        );

        if let Some((list, _, mut scroll)) = lists.iter_mut().find(|(_, owner, _)| owner.0 == *panel) {
            spawn_reply_bubble(&mut commands, list, &final_reply, &fonts, config.font_size);
            scroll_to_newest(&mut scroll);
        }
    }
}

pub(crate) fn toggle_reasoning(
    mut toggles: Query<(&Interaction, &mut ReasoningToggle, &mut BackgroundColor), Changed<Interaction>>,
    mut bodies: Query<&mut Node, With<ReasoningBody>>,
) {
    for (interaction, mut toggle, mut bg) in &mut toggles {
        if *interaction != Interaction::Pressed {
            continue;
        }
        toggle.expanded = !toggle.expanded;
        bg.0 = if toggle.expanded { TOGGLE_ACTIVE } else { TOGGLE_BG };
        if let Ok(mut node) = bodies.get_mut(toggle.body) {
            node.display = if toggle.expanded { Display::Flex } else { Display::None };
        }
    }
}

pub(crate) fn close_panels(
    mut commands: Commands,
    q: Query<(&Interaction, &PanelOf), (Changed<Interaction>, With<CloseButton>)>,
    mut focus: ResMut<FocusedPanel>,
) {
    for (interaction, PanelOf(panel)) in &q {
        if *interaction == Interaction::Pressed {
            info!(target: "bevy_deepchat", "closing chat panel {:?}", panel);
            commands.entity(*panel).despawn();
            if focus.0 == Some(*panel) {
                focus.0 = None;
            }
        }
    }
}

pub(crate) fn button_colors(
    mut q: Query<
        (&Interaction, &mut BackgroundColor, Has<SendButton>),
        (Changed<Interaction>, Or<(With<SendButton>, With<CloseButton>)>),
    >,
) {
    for (interaction, mut bg, is_send) in &mut q {
        bg.0 = match (*interaction, is_send) {
            (Interaction::Hovered | Interaction::Pressed, true) => BUTTON_HOVER,
            (_, true) => BUTTON_BG,
            (Interaction::Hovered | Interaction::Pressed, false) => BORDER,
            (Interaction::None, false) => Color::NONE,
        };
    }
}

/// mirrors each panel's prompt into its input box and resizes the box to the laid-out text.
pub(crate) fn refresh_prompt(
    panels: Query<Ref<PromptInput>>,
    focus: Res<FocusedPanel>,
    config: Res<ChatConfig>,
    mut texts: Query<(&PanelOf, &mut Text, &mut TextColor, Ref<ComputedNode>), With<PromptText>>,
    mut boxes: Query<(&PanelOf, &mut Node, &mut ScrollPosition), With<InputBox>>,
) {
    let focus_changed = focus.is_changed();
    for (PanelOf(panel), mut text, mut color, layout) in &mut texts {
        let Ok(prompt) = panels.get(*panel) else {
            continue;
        };
        if prompt.is_changed() || focus_changed {
            let caret = if focus.0 == Some(*panel) { "|" } else { "" };
            if prompt.text.is_empty() {
                text.0 = format!("{caret}{PLACEHOLDER}");
                color.0 = MUTED;
            } else {
                text.0 = format!("{}{caret}", prompt.text);
                color.0 = TEXT;
            }
        }
        if !prompt.is_changed() && !layout.is_changed() {
            continue;
        }

        let content = prompt_content_height(&prompt.text, &layout, &config);
        let Some((_, mut node, mut scroll)) = boxes.iter_mut().find(|(owner, ..)| owner.0 == *panel) else {
            continue;
        };
        let height = Val::Px(input_height(content, &config));
        if node.height != height {
            node.height = height;
        }
        if input_overflows(content, &config) {
            if node.overflow != Overflow::scroll_y() {
                node.overflow = Overflow::scroll_y();
            }
            scroll_to_newest(&mut scroll);
        } else {
            if node.overflow != Overflow::clip_y() {
                node.overflow = Overflow::clip_y();
            }
            scroll.offset_y = 0.0;
        }
    }
}

/// mouse wheel over a message list scrolls its history.
pub(crate) fn scroll_message_lists(
    mut wheel: EventReader<MouseWheel>,
    config: Res<ChatConfig>,
    mut lists: Query<(&RelativeCursorPosition, &ComputedNode, &mut ScrollPosition), With<MessageList>>,
) {
    for ev in wheel.read() {
        let dy = match ev.unit {
            MouseScrollUnit::Line => ev.y * config.line_height,
            MouseScrollUnit::Pixel => ev.y,
        };
        for (cursor, layout, mut scroll) in &mut lists {
            if !cursor.mouse_over() {
                continue;
            }
            let max_offset =
                (layout.content_size().y - layout.size().y).max(0.0) * layout.inverse_scale_factor();
            scroll.offset_y = (scroll.offset_y.min(max_offset) - dy).clamp(0.0, max_offset);
        }
    }
}

pub(crate) fn refresh_status_lines(
    status: Res<ModelStatus>,
    config: Res<ChatConfig>,
    mut lines: Query<(Ref<StatusLine>, &mut Text, &mut Node)>,
) {
    let banner = status.banner(&config.model);
    for (line, mut text, mut node) in &mut lines {
        if !status.is_changed() && !line.is_added() {
            continue;
        }
        match &banner {
            Some(msg) => {
                text.0 = msg.clone();
                node.display = Display::Flex;
            }
            None => node.display = Display::None,
        }
    }
}
