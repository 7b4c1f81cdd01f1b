#[macro_export]
macro_rules! fail_point_else(($point: ident, $failed: expr, $ok: expr $(,)?) => {{
    $ok
}});

#[macro_export]
macro_rules! fail_point(($point: ident, $err: expr $(,)?) => {{}});
