mod close;
mod versions;
