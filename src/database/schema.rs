pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS media_type (
        id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL
    );

    CREATE TABLE IF NOT EXISTS file_name (
        id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL
    );

    CREATE TABLE IF NOT EXISTS owner (
        id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL
    );

    CREATE TABLE IF NOT EXISTS path_item (
        id INTEGER PRIMARY KEY,
        parent_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        UNIQUE(parent_id, name)
    );
    CREATE INDEX IF NOT EXISTS idx_path_item_name ON path_item(name);

    CREATE TABLE IF NOT EXISTS asset (
        id INTEGER PRIMARY KEY,
        hash TEXT UNIQUE NOT NULL,
        media_type_id INTEGER NOT NULL,
        latest_file_time DATETIME,
        latest_name_id INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY(media_type_id) REFERENCES media_type(id)
    );
    CREATE INDEX IF NOT EXISTS idx_asset_media_type ON asset(media_type_id);
    CREATE INDEX IF NOT EXISTS idx_asset_file_time ON asset(latest_file_time);

    CREATE TABLE IF NOT EXISTS origin (
        id INTEGER PRIMARY KEY,
        asset_id INTEGER NOT NULL,
        name_id INTEGER NOT NULL,
        path_id INTEGER NOT NULL,
        owner_id INTEGER NOT NULL,
        file_time DATETIME NOT NULL,
        FOREIGN KEY(asset_id) REFERENCES asset(id)
    );
    CREATE INDEX IF NOT EXISTS idx_origin_asset ON origin(asset_id);
    CREATE INDEX IF NOT EXISTS idx_origin_name ON origin(name_id);
    CREATE INDEX IF NOT EXISTS idx_origin_path ON origin(path_id);

    CREATE TABLE IF NOT EXISTS face_similarity (
        id INTEGER PRIMARY KEY,
        asset_a_id INTEGER NOT NULL,
        face_a INTEGER NOT NULL,
        asset_b_id INTEGER NOT NULL,
        face_b INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_face_similarity_a ON face_similarity(asset_a_id, face_a);
    CREATE INDEX IF NOT EXISTS idx_face_similarity_b ON face_similarity(asset_b_id, face_b);

    CREATE TABLE IF NOT EXISTS collection (
        id INTEGER PRIMARY KEY,
        hash TEXT UNIQUE NOT NULL,
        name TEXT NOT NULL,
        created DATETIME NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_collection_name ON collection(name);
    CREATE INDEX IF NOT EXISTS idx_collection_created ON collection(created);
";
