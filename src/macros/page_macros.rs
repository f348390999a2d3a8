#[macro_export]
macro_rules! with_create_pages {
    ($pool:expr, [ $( ($id:expr, $var:ident) ),+ ], $flush:expr, $body:block ) => {{
        paste! {
            $(
                let mut [<pg_ $var>] = $pool.create_page().expect("create failed");
                $id = [<pg_ $var>].id();
                let mut $var = [<pg_ $var>].write();
            )+

            { $body }

            // drop page locks first, then the guards release their pins
            $(
                drop($var);
                drop([<pg_ $var>]);
                if $flush {
                    $pool.flush_page($id).expect("flush failed");
                }
            )+
        }
    }};
}

#[macro_export]
macro_rules! with_write_pages {
    ($pool:expr, [ $( ($id:expr, $var:ident) ),+ ], $flush:expr, $body:block ) => {{
        paste! {
            $(
                let mut [<pg_ $var>] = $pool.fetch_page($id).expect("fetch failed");
                let mut $var = [<pg_ $var>].write();
            )+

            { $body }

            $(
                drop($var);
                drop([<pg_ $var>]);
                if $flush {
                    $pool.flush_page($id).expect("flush failed");
                }
            )+
        }
    }};
}

#[macro_export]
macro_rules! with_read_pages {
    ($pool:expr, [ $( ($id:expr, $var:ident) ),+ ], $body:block ) => {{
        paste! {
            $(
                let [<pg_ $var>] = $pool.fetch_page($id).expect("fetch failed");
                let $var = [<pg_ $var>].read();
            )+

            { $body }

            $(
                drop($var);
                drop([<pg_ $var>]);
            )+
        }
    }};
}
