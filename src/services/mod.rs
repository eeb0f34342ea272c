pub mod hero;
pub mod tmdb;
