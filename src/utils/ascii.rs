pub fn print_startup_banner() {
    let year = chrono::Local::now().format("%Y").to_string();

    // ANSI color codes
    let amber = "\x1B[38;5;214m";
    let gray = "\x1B[38;5;245m";
    let bright = "\x1B[93m";
    let reset = "\x1B[0m";

    println!(
        r#"
  {year} Folio
   {amber}
        _______  _______
       /      / /      /|     {gray}One call per title,{amber}
      /  ~~  / /  ~~  / |     {gray}one title per call,{amber}
     /  ~~  / /  ~~  /  |
    /______/_/______/   /     {gray}and the catalog{amber}
    |______|_|______|  /      {gray}never hears twice.{amber}
    |______|_|______| /
    |______|_|______|/
         {bright}folio v{version}{reset}
"#,
        year = year,
        amber = amber,
        gray = gray,
        bright = bright,
        reset = reset,
        version = env!("CARGO_PKG_VERSION"),
    );
}
