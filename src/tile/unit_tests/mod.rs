#[cfg(test)]
mod tile_tests;
