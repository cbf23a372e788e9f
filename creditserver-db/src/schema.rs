diesel::table! {
    users (id) {
        id -> Bigint,
        uid -> Varchar,
        login -> Varchar,
        admin -> Integer,
        whitelisted -> Integer,
        credits -> Integer,
        lastseen -> Integer,
        comment -> Text,
    }
}

diesel::table! {
    search_log (id) {
        id -> Bigint,
        login -> Varchar,
        guid -> Binary,
        ip -> Binary,
        dt -> Bigint,
        misc -> Text,
    }
}
