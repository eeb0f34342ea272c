pub fn print_startup_banner() {
    let year = chrono::Local::now().format("%Y").to_string();

    // ANSI color codes
    let cyan = "\x1B[38;5;44m";
    let gray = "\x1B[38;5;245m";
    let bright_cyan = "\x1B[96m";
    let reset = "\x1B[0m";

    println!(
        r#"
  {year} tvcache
   {cyan}
        \    /
         \  /
    .-----\/-----------.
    | .--------------. |     {gray}fresh from the store,{cyan}
    | |              | |     {gray}stale when it must be{cyan}
    | |   ▶  ▮▮  ■   | |
    | |              | |
    | '--------------' |
    '----------o-------'
        _/        \_
         {bright_cyan}tvcache v{version}{reset}
"#,
        year = year,
        cyan = cyan,
        gray = gray,
        bright_cyan = bright_cyan,
        version = env!("CARGO_PKG_VERSION"),
        reset = reset
    );
}
