use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

pub fn draw_help(area: Rect, f: &mut Frame) {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Magenta));
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            key("q"),
            Span::raw(" / "),
            key("Ctrl-C"),
            Span::raw("  Quit"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("s"),
            Span::raw("           Start campaign"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("p"),
            Span::raw("           Pause/Resume"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("c"),
            Span::raw("           Cancel run"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("f"),
            Span::raw("           Resend failed entries"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("o"),
            Span::raw("           Optimize message (needs API key)"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("+"),
            Span::raw(" / "),
            key("-"),
            Span::raw("     Adjust send delay by 0.5s"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("a"),
            Span::raw("           Toggle auto-save"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("tab"),
            Span::raw("         Switch tabs"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("?"),
            Span::raw("           Show this help"),
        ]),
        Line::from(""),
        Line::from("Log tab:"),
        Line::from(vec![
            Span::raw("  "),
            key("↑/↓"),
            Span::raw(" or "),
            key("j/k"),
            Span::raw("  Scroll"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("e"),
            Span::raw("           Export log as JSON"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("w"),
            Span::raw("           Export log as CSV"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("x"),
            Span::raw("           Clear log (bulk)"),
        ]),
        Line::from(""),
        Line::from("Import format:"),
        Line::from("  one contact per line: phone[,name]; blank phones are dropped"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
