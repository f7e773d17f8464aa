pub mod helpers;
mod tests_open;
